//! Watchdog thread for monitoring slow command dispatches.
//!
//! The serial worker records the command it is dispatching; the watchdog
//! thread checks it periodically and raises one alert for any command that
//! has been running longer than the timeout. A command stuck that long is
//! usually waiting on a mesh stack call that will not return.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use meshgate_metrics::{metric_defs, GatewayLabels};
use parking_lot::Mutex;
use tracing::error;

/// Information about the command being dispatched.
#[derive(Debug, Clone)]
pub struct CurrentCommandInfo {
    /// Command number (sequential count since the worker started).
    pub command_number: u64,
    /// Verb of the command, as used in metric labels.
    pub verb: &'static str,
    /// Line length in bytes.
    pub line_len: usize,
    /// When dispatch started.
    pub started_at: Instant,
}

impl CurrentCommandInfo {
    /// Record a command starting now.
    pub fn new(command_number: u64, verb: &'static str, line_len: usize) -> Self {
        CurrentCommandInfo {
            command_number,
            verb,
            line_len,
            started_at: Instant::now(),
        }
    }
}

/// Shared state between the serial worker and the watchdog thread.
pub struct WatchdogState {
    /// The command being dispatched.
    current_command: Mutex<Option<CurrentCommandInfo>>,
    /// Flag to signal the watchdog thread to stop.
    stop_flag: AtomicBool,
    /// Count of watchdog alerts fired.
    alert_count: AtomicU64,
}

impl WatchdogState {
    /// Create a new watchdog state.
    pub fn new() -> Self {
        WatchdogState {
            current_command: Mutex::new(None),
            stop_flag: AtomicBool::new(false),
            alert_count: AtomicU64::new(0),
        }
    }

    /// Set (or clear) the command being dispatched.
    pub fn set_current_command(&self, info: Option<CurrentCommandInfo>) {
        *self.current_command.lock() = info;
    }

    /// Get the command being dispatched.
    pub fn current_command(&self) -> Option<CurrentCommandInfo> {
        self.current_command.lock().clone()
    }

    /// Signal the watchdog to stop.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Check if the watchdog should stop.
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Increment and return the alert count.
    pub fn increment_alert_count(&self) -> u64 {
        self.alert_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Alerts fired so far.
    pub fn alert_count(&self) -> u64 {
        self.alert_count.load(Ordering::Relaxed)
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// Watchdog thread handle.
pub struct Watchdog {
    state: Arc<WatchdogState>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Watchdog {
    /// Create and start a new watchdog thread.
    pub fn new(timeout: Duration, labels: GatewayLabels) -> Self {
        let state = Arc::new(WatchdogState::new());
        let watchdog_state = Arc::clone(&state);
        let check_interval = (timeout / 4).clamp(Duration::from_millis(1), Duration::from_millis(500));

        let thread_handle = thread::spawn(move || {
            let mut last_alerted: Option<u64> = None;

            while !watchdog_state.should_stop() {
                thread::sleep(check_interval);

                let Some(command) = watchdog_state.current_command() else {
                    continue;
                };
                let elapsed = command.started_at.elapsed();

                // Only alert once per command
                if elapsed >= timeout && last_alerted != Some(command.command_number) {
                    last_alerted = Some(command.command_number);
                    let alert_num = watchdog_state.increment_alert_count();
                    error!(
                        target: "MAIN",
                        "watchdog alert #{}: command #{} ({}, {} bytes) running for {:.1}s",
                        alert_num,
                        command.command_number,
                        command.verb,
                        command.line_len,
                        elapsed.as_secs_f64()
                    );
                    metrics::counter!(metric_defs::WATCHDOG_ALERTS.name, &labels.to_labels()).increment(1);
                }
            }
        });

        Watchdog {
            state,
            thread_handle: Some(thread_handle),
            timeout,
        }
    }

    /// Get a reference to the watchdog state for the worker to update.
    pub fn state(&self) -> &Arc<WatchdogState> {
        &self.state
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the watchdog thread and wait for it to finish.
    pub fn stop(mut self) {
        self.state.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.state.stop();
        // Don't wait for the thread here; it exits on its next check
    }
}
