//! Host runner for the meshgate commissioning gateway.
//!
//! The runner plays the part of the device around the gateway core: it
//! opens the serial transport and the persistent store, boots a gateway
//! over the simulated stack and reboots it whenever a command restarts the
//! device.

pub mod store;
pub mod transport;
pub mod uart_server;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use meshgate_core::{
    init_store, shared_store, ConfigError, FatalInitError, Gateway, GatewayConfig, HostPlatform, MemoryStore,
    Platform, RestartSignal, SharedStore, SimStack, WorkerExit,
};
use meshgate_metrics::GatewayLabels;
use thiserror::Error;
use tracing::{error, info, warn};

pub use store::FileStore;
pub use transport::{ResponseWriter, Transport};
pub use uart_server::UartServer;

/// Consecutive failed boots tolerated before the runner gives up.
pub const MAX_FATAL_RESTARTS: u32 = 3;

/// Pause between a failed boot and the next attempt.
pub const FATAL_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The serial transport could not be opened.
    #[error("failed to open transport: {0}")]
    Transport(#[source] io::Error),

    /// Every boot attempt in a row failed.
    #[error("gave up after {attempts} failed boots: {source}")]
    Fatal {
        /// Boots attempted.
        attempts: u32,
        /// The last failure.
        #[source]
        source: FatalInitError,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Boots completed, including the first.
    pub boots: u32,
    /// Commands dispatched across all boots.
    pub commands: u64,
    /// Why the last boot ended.
    pub exit: WorkerExit,
}

/// Open the persistent store named by the configuration.
///
/// Without a `store_dir` the store lives in memory and survives reboots
/// within this process only.
pub fn open_store(config: &GatewayConfig) -> SharedStore {
    match &config.store_dir {
        Some(dir) => {
            info!(target: "MAIN", "persistent store in {}", dir.display());
            shared_store(FileStore::new(dir))
        }
        None => {
            info!(target: "MAIN", "no store_dir configured, network settings are kept in memory");
            shared_store(MemoryStore::new())
        }
    }
}

/// Open the configured transport and store, then run until shutdown.
pub fn run(config: &GatewayConfig, shutdown: Arc<AtomicBool>) -> Result<RunSummary, RunnerError> {
    config.validate()?;
    let transport = Transport::open(&config.serial).map_err(RunnerError::Transport)?;
    let store = open_store(config);
    run_with_transport(config, store, &transport, shutdown)
}

/// Boot the gateway over `transport` and `store` until shutdown or until
/// the transport closes, rebooting after every restart.
pub fn run_with_transport(
    config: &GatewayConfig,
    store: SharedStore,
    transport: &Transport,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary, RunnerError> {
    config.validate()?;
    let mut summary = RunSummary {
        boots: 0,
        commands: 0,
        exit: WorkerExit::Shutdown,
    };
    let mut failures = 0;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            summary.exit = WorkerExit::Shutdown;
            return Ok(summary);
        }

        match boot_once(config, &store, transport, &shutdown) {
            Ok((exit, commands)) => {
                failures = 0;
                summary.boots += 1;
                summary.commands += commands;
                summary.exit = exit;
                match exit {
                    WorkerExit::Restart => info!(target: "MAIN", "rebooting"),
                    WorkerExit::Shutdown | WorkerExit::PortClosed => return Ok(summary),
                }
            }
            Err(e) => {
                failures += 1;
                error!(target: "MAIN", "boot failed ({}/{}): {}", failures, MAX_FATAL_RESTARTS, e);
                if failures >= MAX_FATAL_RESTARTS {
                    return Err(RunnerError::Fatal {
                        attempts: failures,
                        source: e,
                    });
                }
                thread::sleep(FATAL_RESTART_DELAY);
            }
        }
    }
}

/// One boot: bring up the store, the stack and the gateway, then serve
/// the serial port until the worker stops.
fn boot_once(
    config: &GatewayConfig,
    store: &SharedStore,
    transport: &Transport,
    shutdown: &Arc<AtomicBool>,
) -> Result<(WorkerExit, u64), FatalInitError> {
    init_store(&mut *store.lock())?;

    let restart = RestartSignal::new();
    let platform: Arc<dyn Platform> = Arc::new(HostPlatform::new(Arc::clone(store), restart.clone()));
    let stack = SimStack::with_store(Arc::clone(store))?;
    let labels = GatewayLabels::new(config.device_name.clone(), transport.name());

    let gateway = Gateway::new(config, stack, platform, transport.sink(), labels)
        .map_err(|e| FatalInitError::Setup(e.to_string()))?;
    let resumed = gateway.boot().map_err(|e| FatalInitError::Setup(e.to_string()))?;
    info!(
        target: "MAIN",
        "{} up{}",
        config.device_name,
        if resumed { ", persisted network restored" } else { "" }
    );

    let watchdog = gateway.start_watchdog();
    let mut worker = gateway
        .serial_worker(Box::new(transport.port()))
        .with_shutdown(Arc::clone(shutdown));
    if let Some(watchdog) = &watchdog {
        worker = worker.with_watchdog(Arc::clone(watchdog.state()));
    }

    let exit = worker.run();
    let commands = worker.commands();
    if let Some(watchdog) = watchdog {
        watchdog.stop();
    }

    if exit == WorkerExit::Restart && !restart.is_requested() {
        warn!(target: "MAIN", "worker stopped for a restart nobody requested");
    }
    Ok((exit, commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_core::StoreError;

    #[test]
    fn test_open_store_in_memory_by_default() {
        let store = open_store(&GatewayConfig::default());
        let mut store = store.lock();
        store.init().unwrap();
        assert!(store.load_dataset().unwrap().is_none());
    }

    #[test]
    fn test_open_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.store_dir = Some(dir.path().join("nvs"));

        open_store(&config).lock().init().unwrap();
        assert!(dir.path().join("nvs").join("store.json").exists());
    }

    #[test]
    fn test_fatal_error_reports_attempts() {
        let err = RunnerError::Fatal {
            attempts: 3,
            source: FatalInitError::Store(StoreError::Corrupt("bad".into())),
        };
        assert_eq!(
            err.to_string(),
            "gave up after 3 failed boots: persistent store init failed: corrupt record: bad"
        );
    }
}
