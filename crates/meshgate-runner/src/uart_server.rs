//! UART TCP Server Module
//!
//! Exposes the gateway's serial interface on a TCP port. One client is
//! served at a time; bytes it sends are fed to the serial worker and
//! response lines are written back to it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Responses buffered for a slow client before new ones are dropped.
const TX_BUFFER: usize = 256;

/// Size of one socket read.
const READ_BUFFER: usize = 1024;

// ============================================================================
// Server
// ============================================================================

/// A TCP listener bridging one client to the serial worker.
///
/// The server owns its tokio runtime; dropping it stops the listener and
/// closes the serial channel it feeds.
pub struct UartServer {
    runtime: Runtime,
    local_addr: SocketAddr,
    tx_sender: mpsc::Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

impl UartServer {
    /// Bind `addr` and start accepting clients.
    ///
    /// Bytes received from the client are sent on `rx_sender`. Port 0 binds
    /// an ephemeral port; see [`local_addr`](Self::local_addr).
    pub fn start(addr: SocketAddr, rx_sender: Sender<Vec<u8>>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("uart-server")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(addr))?;
        let local_addr = listener.local_addr()?;
        let (tx_sender, tx_receiver) = mpsc::channel(TX_BUFFER);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        runtime.spawn(async move {
            if let Err(e) = run_uart_listener(listener, tx_receiver, rx_sender, flag).await {
                warn!(target: "UART_RX", "UART listener stopped: {}", e);
            }
        });

        info!(target: "MAIN", "UART listening on {}", local_addr);
        Ok(UartServer {
            runtime,
            local_addr,
            tx_sender,
            connected,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a client is connected right now.
    pub fn is_client_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Send data to the connected client.
    /// Only sends if a client is connected, otherwise silently drops data.
    pub fn send_to_client(&self, data: &[u8]) {
        if !self.is_client_connected() {
            return;
        }
        // try_send never blocks the caller; a full buffer drops the data.
        if let Err(e) = self.tx_sender.try_send(data.to_vec()) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(target: "UART_RX", "TX buffer full, response dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!(target: "UART_RX", "UART listener gone, response dropped");
                }
            }
        }
    }

    /// Stop the listener without waiting for in-flight writes.
    pub fn shutdown(self) {
        self.runtime.shutdown_background();
    }
}

/// Accept clients one at a time until the runtime stops.
async fn run_uart_listener(
    listener: TcpListener,
    mut tx_receiver: mpsc::Receiver<Vec<u8>>,
    rx_sender: Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
) -> io::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        info!(target: "UART_RX", "client {} connected", peer_addr);

        // Responses queued while nobody was listening are stale.
        while tx_receiver.try_recv().is_ok() {}
        connected.store(true, Ordering::Release);

        let result = handle_uart_connection(stream, &mut tx_receiver, &rx_sender).await;

        connected.store(false, Ordering::Release);
        match result {
            Ok(ConnectionEnd::ClientClosed) => info!(target: "UART_RX", "client {} disconnected", peer_addr),
            Ok(ConnectionEnd::WorkerGone) => return Ok(()),
            Err(e) => warn!(target: "UART_RX", "connection error with {}: {}", peer_addr, e),
        }
    }
}

enum ConnectionEnd {
    ClientClosed,
    WorkerGone,
}

/// Shuttle bytes between one client and the serial worker.
async fn handle_uart_connection(
    mut stream: TcpStream,
    tx_receiver: &mut mpsc::Receiver<Vec<u8>>,
    rx_sender: &Sender<Vec<u8>>,
) -> io::Result<ConnectionEnd> {
    let (mut reader, mut writer) = stream.split();
    let mut read_buf = [0u8; READ_BUFFER];

    loop {
        tokio::select! {
            // Client -> serial worker
            result = reader.read(&mut read_buf) => {
                match result? {
                    0 => return Ok(ConnectionEnd::ClientClosed),
                    n => {
                        if rx_sender.send(read_buf[..n].to_vec()).is_err() {
                            return Ok(ConnectionEnd::WorkerGone);
                        }
                    }
                }
            }

            // Responses -> client
            Some(data) = tx_receiver.recv() => {
                writer.write_all(&data).await?;
                writer.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn wait_connected(server: &UartServer) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !server.is_client_connected() {
            assert!(Instant::now() < deadline, "client never registered");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bytes_flow_both_ways() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let server = UartServer::start(loopback(), tx).unwrap();
        assert!(!server.is_client_connected());

        let mut client = StdTcpStream::connect(server.local_addr()).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        wait_connected(&server);

        client.write_all(b"commissioner_start\n").unwrap();
        let chunk = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(chunk, b"commissioner_start\n");

        server.send_to_client(b"COMMISSIONER_STARTED\n");
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"COMMISSIONER_STARTED\n");
    }

    #[test]
    fn test_send_without_client_is_dropped() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let server = UartServer::start(loopback(), tx).unwrap();
        server.send_to_client(b"NETWORK_FORMED\n");

        let mut client = StdTcpStream::connect(server.local_addr()).unwrap();
        client.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        wait_connected(&server);
        let mut buf = [0u8; 64];
        assert!(client.read(&mut buf).is_err());
        server.shutdown();
    }
}
