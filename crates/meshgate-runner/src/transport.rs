//! Serial transports: where command bytes come from and where response
//! lines go.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use meshgate_core::{ChannelPort, ResponseSink, SerialConfig, TransportConfig};
use meshgate_protocol::{encode_line, Response};
use tracing::{debug, info, warn};

use crate::uart_server::UartServer;

/// Writes response lines to the active transport.
pub enum ResponseWriter {
    /// One line per response on standard output.
    Stdout,
    /// Lines sent to the connected TCP client.
    Tcp(UartServer),
}

impl ResponseSink for ResponseWriter {
    fn send(&self, response: &Response) {
        let line = encode_line(&response.to_line());
        match self {
            ResponseWriter::Stdout => {
                let mut out = io::stdout().lock();
                if let Err(e) = out.write_all(&line).and_then(|_| out.flush()) {
                    warn!(target: "UART_RX", "failed to write response: {}", e);
                }
            }
            ResponseWriter::Tcp(server) => {
                debug!(target: "UART_RX", "-> {}", response);
                server.send_to_client(&line);
            }
        }
    }
}

/// An open transport.
///
/// The transport outlives individual boots: each boot takes a fresh
/// [`ChannelPort`] over the same byte channel.
pub struct Transport {
    rx: Receiver<Vec<u8>>,
    writer: Arc<ResponseWriter>,
    local_addr: Option<SocketAddr>,
}

impl Transport {
    /// Open the transport described by `serial`.
    pub fn open(serial: &SerialConfig) -> io::Result<Self> {
        match serial.transport {
            TransportConfig::Stdio => Ok(Self::stdio(serial.read_chunk)),
            TransportConfig::Tcp { port } => Self::tcp(SocketAddr::from(([0, 0, 0, 0], port))),
        }
    }

    /// Read commands from standard input and answer on standard output.
    ///
    /// Input is read in chunks of at most `read_chunk` bytes. The port
    /// closes when standard input reaches end of file.
    pub fn stdio(read_chunk: usize) -> Self {
        let (tx, rx) = unbounded();
        let chunk = read_chunk.max(1);
        let spawned = thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || read_stdin(tx, chunk));
        if let Err(e) = spawned {
            warn!(target: "MAIN", "failed to start stdin reader: {}", e);
        }
        Transport {
            rx,
            writer: Arc::new(ResponseWriter::Stdout),
            local_addr: None,
        }
    }

    /// Serve one TCP client at a time on `addr`.
    pub fn tcp(addr: SocketAddr) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let server = UartServer::start(addr, tx)?;
        let local_addr = server.local_addr();
        Ok(Transport {
            rx,
            writer: Arc::new(ResponseWriter::Tcp(server)),
            local_addr: Some(local_addr),
        })
    }

    /// A fresh serial port over the transport's byte stream.
    pub fn port(&self) -> ChannelPort {
        ChannelPort::new(self.rx.clone())
    }

    /// The response sink for this transport.
    pub fn sink(&self) -> Arc<dyn ResponseSink> {
        self.writer.clone()
    }

    /// Bound address for TCP transports.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Transport name used in metric labels.
    pub fn name(&self) -> &'static str {
        match *self.writer {
            ResponseWriter::Stdout => "stdio",
            ResponseWriter::Tcp(_) => "tcp",
        }
    }
}

fn read_stdin(tx: Sender<Vec<u8>>, chunk: usize) {
    let mut stdin = io::stdin().lock();
    let mut buf = vec![0u8; chunk];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => {
                info!(target: "UART_RX", "stdin closed");
                return;
            }
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(target: "UART_RX", "stdin read failed: {}", e);
                return;
            }
        }
    }
}
