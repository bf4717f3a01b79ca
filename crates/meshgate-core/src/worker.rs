//! Serial worker.
//!
//! A single thread reads the serial stream in bounded chunks, frames lines
//! and dispatches them one at a time. Nothing else dispatches commands, so
//! no two commands ever run concurrently.
//!
//! ## Key Types
//!
//! - [`SerialPort`]: bounded-timeout byte source
//! - [`ChannelPort`]: a [`SerialPort`] fed through a channel by a transport
//! - [`SerialWorker`]: the read, frame and dispatch loop

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use meshgate_metrics::metric_defs;
use meshgate_protocol::{
    first_token, LineFramer, SIGNATURE_SEPARATOR, VERB_ADD, VERB_COMMISSIONER_START, VERB_COMMISSIONER_STOP,
    VERB_FACTORY_RESET, VERB_FORM_NET, VERB_FORM_NET_LOWER,
};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::stack::MeshStack;
use crate::watchdog::{CurrentCommandInfo, WatchdogState};

// ============================================================================
// Serial Ports
// ============================================================================

/// A byte source read with a bounded wait.
pub trait SerialPort: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// `Ok(0)` means nothing arrived in time. An error of kind
    /// [`io::ErrorKind::UnexpectedEof`] means the port is gone for good.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// A [`SerialPort`] fed with chunks through a channel.
pub struct ChannelPort {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Create a channel-backed port and the sender that feeds it.
///
/// Dropping every sender closes the port once buffered bytes are read.
pub fn channel_port() -> (Sender<Vec<u8>>, ChannelPort) {
    let (tx, rx) = unbounded();
    (tx, ChannelPort::new(rx))
}

impl ChannelPort {
    /// A port reading from `rx`. Receivers can be cloned, so a transport
    /// that outlives one worker can hand a fresh port to the next.
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        ChannelPort { rx, pending: Vec::new() }
    }
}

impl SerialPort for ChannelPort {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// A command restarted the device.
    Restart,
    /// Shutdown was requested.
    Shutdown,
    /// The serial port closed.
    PortClosed,
}

/// Read loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Most bytes taken per read.
    pub read_chunk: usize,
    /// How long one read waits.
    pub read_timeout: Duration,
    /// Pause after each read.
    pub idle_delay: Duration,
    /// Longest line, terminator included.
    pub max_line_len: usize,
}

impl WorkerSettings {
    /// Settings from the serial section of the configuration.
    pub fn from_config(serial: &SerialConfig, max_line_len: usize) -> Self {
        WorkerSettings {
            read_chunk: serial.read_chunk.max(1),
            read_timeout: Duration::from_millis(serial.read_timeout_ms),
            idle_delay: Duration::from_millis(serial.idle_delay_ms),
            max_line_len,
        }
    }
}

/// Verb name for metric labels; anything unrecognized is `other`.
pub fn verb_label(line: &str) -> &'static str {
    let word = first_token(line).unwrap_or("");
    let word = word.split(SIGNATURE_SEPARATOR).next().unwrap_or("");
    match word {
        VERB_COMMISSIONER_START => VERB_COMMISSIONER_START,
        VERB_COMMISSIONER_STOP => VERB_COMMISSIONER_STOP,
        VERB_FORM_NET | VERB_FORM_NET_LOWER => VERB_FORM_NET_LOWER,
        VERB_ADD => VERB_ADD,
        VERB_FACTORY_RESET => VERB_FACTORY_RESET,
        _ => "other",
    }
}

/// The read, frame and dispatch loop.
pub struct SerialWorker<S> {
    port: Box<dyn SerialPort>,
    framer: LineFramer,
    dispatcher: Arc<Dispatcher<S>>,
    settings: WorkerSettings,
    watchdog: Option<Arc<WatchdogState>>,
    shutdown: Arc<AtomicBool>,
    commands: u64,
}

impl<S: MeshStack> SerialWorker<S> {
    /// Create a worker reading from `port`.
    pub fn new(port: Box<dyn SerialPort>, dispatcher: Arc<Dispatcher<S>>, settings: WorkerSettings) -> Self {
        SerialWorker {
            port,
            framer: LineFramer::with_max_len(settings.max_line_len),
            dispatcher,
            settings,
            watchdog: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            commands: 0,
        }
    }

    /// Report each dispatch to a watchdog.
    pub fn with_watchdog(mut self, state: Arc<WatchdogState>) -> Self {
        self.watchdog = Some(state);
        self
    }

    /// Stop the loop when `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Commands dispatched so far.
    pub fn commands(&self) -> u64 {
        self.commands
    }

    /// Run until a restart, a shutdown request or the port closing.
    pub fn run(&mut self) -> WorkerExit {
        let mut buf = vec![0u8; self.settings.read_chunk];
        info!(target: "UART_RX", "serial worker started");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return WorkerExit::Shutdown;
            }

            match self.port.read(&mut buf, self.settings.read_timeout) {
                Ok(0) => {}
                Ok(n) => {
                    if let Some(exit) = self.feed(&buf[..n]) {
                        return exit;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(target: "UART_RX", "serial port closed");
                    return WorkerExit::PortClosed;
                }
                Err(e) => warn!(target: "UART_RX", "serial read failed: {}", e),
            }

            if !self.settings.idle_delay.is_zero() {
                thread::sleep(self.settings.idle_delay);
            }
        }
    }

    /// Frame `data` and dispatch any complete lines.
    fn feed(&mut self, data: &[u8]) -> Option<WorkerExit> {
        let overflows = self.framer.overflows();
        self.framer.push(data);
        let dropped = self.framer.overflows() - overflows;
        if dropped > 0 {
            let labels = self.dispatcher_labels();
            metrics::counter!(metric_defs::SERIAL_OVERFLOWS.name, &labels).increment(dropped);
        }

        while let Some(line) = self.framer.decode_line() {
            if self.handle_line(&line) == Dispatch::Restart {
                self.framer.clear();
                return Some(WorkerExit::Restart);
            }
        }
        None
    }

    fn handle_line(&mut self, line: &str) -> Dispatch {
        self.commands += 1;
        let verb = verb_label(line);
        let labels = self.dispatcher_labels();
        metrics::counter!(metric_defs::SERIAL_LINES.name, &labels).increment(1);

        if let Some(watchdog) = &self.watchdog {
            watchdog.set_current_command(Some(CurrentCommandInfo::new(self.commands, verb, line.len())));
        }
        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(line);
        let elapsed = started.elapsed();
        if let Some(watchdog) = &self.watchdog {
            watchdog.set_current_command(None);
        }

        debug!(target: "UART_RX", "{} dispatched in {:?}", verb, elapsed);
        let labels = self.dispatcher.labels().with(&[("verb", verb.to_string())]);
        metrics::histogram!(metric_defs::DISPATCH_DURATION.name, &labels).record(elapsed.as_micros() as f64);
        outcome
    }

    fn dispatcher_labels(&self) -> Vec<(&'static str, String)> {
        self.dispatcher.labels().to_labels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_port_splits_chunks() {
        let (tx, mut port) = channel_port();
        tx.send(b"abcdef".to_vec()).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf, Duration::from_millis(10)).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read(&mut buf, Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(port.read(&mut buf, Duration::from_millis(10)).unwrap(), 0);

        drop(tx);
        let err = port.read(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_verb_label() {
        assert_eq!(verb_label("commissioner_start"), "commissioner_start");
        assert_eq!(verb_label("FORM_NET lab"), "form_net");
        assert_eq!(verb_label("add * ABCDEF|00"), "add");
        assert_eq!(verb_label("factory_reset|abcdef"), "factory_reset");
        assert_eq!(verb_label("hello world"), "other");
        assert_eq!(verb_label(""), "other");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = WorkerSettings::from_config(&SerialConfig::default(), 1024);
        assert_eq!(settings.read_chunk, 127);
        assert_eq!(settings.read_timeout, Duration::from_millis(50));
        assert_eq!(settings.idle_delay, Duration::from_millis(10));
    }
}
