//! Gateway assembly.
//!
//! [`Gateway`] wires one stack handle to the dispatcher, the event bridge
//! and the serial worker according to a [`GatewayConfig`].

use std::sync::Arc;

use meshgate_metrics::GatewayLabels;
use meshgate_protocol::CommandAuthenticator;
use tracing::warn;

use crate::bridge::EventBridge;
use crate::commissioner::CommissionerController;
use crate::config::{GatewayConfig, LockTimeouts};
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::GatewayError;
use crate::joiner::JoinerAdmission;
use crate::lock::SharedStack;
use crate::network::NetworkFormer;
use crate::platform::Platform;
use crate::sink::ResponseSink;
use crate::stack::MeshStack;
use crate::watchdog::Watchdog;
use crate::worker::{SerialPort, SerialWorker, WorkerSettings};

/// A fully wired gateway around one mesh stack.
pub struct Gateway<S> {
    stack: SharedStack<S>,
    dispatcher: Arc<Dispatcher<S>>,
    network: NetworkFormer<S>,
    settings: WorkerSettings,
    config: GatewayConfig,
}

impl<S: MeshStack + 'static> Gateway<S> {
    /// Build a gateway over `stack`.
    ///
    /// The event bridge is subscribed to the stack before this returns, so
    /// attach notifications from then on start the commissioner.
    pub fn new(
        config: &GatewayConfig,
        stack: S,
        platform: Arc<dyn Platform>,
        sink: Arc<dyn ResponseSink>,
        labels: GatewayLabels,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        if config.hmac_key.is_default() {
            warn!(target: "SECURITY", "using the built-in development key; set hmac_key before deployment");
        }
        if config.log_credentials {
            warn!(target: "SECURITY", "joiner credentials will appear in debug logs");
        }

        let auth = CommandAuthenticator::new(config.hmac_key.as_bytes())?.with_check(config.signature_check());
        let timeouts: LockTimeouts = config.lock_timeouts();
        let stack = SharedStack::new(stack, labels);
        let commissioner = Arc::new(CommissionerController::new(stack.labels().clone()));

        let bridge = EventBridge::new(stack.downgrade(), Arc::clone(&commissioner), timeouts.bridge);
        stack.acquire("subscribe", timeouts.commissioner)?.subscribe(Arc::new(bridge));

        let admission = JoinerAdmission::new(stack.clone(), timeouts.admission)
            .with_credential_logging(config.log_credentials);
        let network = NetworkFormer::new(stack.clone(), Arc::clone(&platform), config.channel, timeouts.formation);
        let dispatcher = Dispatcher::new(
            auth,
            stack.clone(),
            commissioner,
            admission,
            network.clone(),
            platform,
            sink,
            timeouts.commissioner,
            config.joiner_timeout_secs,
        );

        Ok(Gateway {
            stack,
            dispatcher: Arc::new(dispatcher),
            network,
            settings: WorkerSettings::from_config(&config.serial, config.max_line_len),
            config: config.clone(),
        })
    }

    /// Bring a persisted network back up. Returns whether one was found.
    pub fn boot(&self) -> Result<bool, GatewayError> {
        self.network.resume()
    }

    /// Handle one command line.
    pub fn dispatch(&self, line: &str) -> Dispatch {
        self.dispatcher.dispatch(line)
    }

    /// The shared stack handle.
    pub fn stack(&self) -> &SharedStack<S> {
        &self.stack
    }

    /// The configuration the gateway was built from.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Start the dispatch watchdog, if enabled.
    pub fn start_watchdog(&self) -> Option<Watchdog> {
        self.config
            .watchdog_timeout()
            .map(|timeout| Watchdog::new(timeout, self.stack.labels().clone()))
    }

    /// A serial worker reading commands from `port`.
    pub fn serial_worker(&self, port: Box<dyn SerialPort>) -> SerialWorker<S> {
        SerialWorker::new(port, Arc::clone(&self.dispatcher), self.settings)
    }
}
