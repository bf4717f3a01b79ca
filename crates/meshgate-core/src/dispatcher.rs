//! Command dispatch.
//!
//! One framed line in, at most one response line out. Unsigned verbs run
//! straight away; everything else must carry a valid signature before its
//! body is even tokenized.
//!
//! Note that the unsigned verbs (`commissioner_start`, `commissioner_stop`,
//! `FORM_NET`) are reachable by anything that can write to the serial link,
//! without the shared key.

use std::sync::Arc;
use std::time::Duration;

use meshgate_metrics::{metric_defs, GatewayLabels};
use meshgate_protocol::{AuthError, Command, CommandAuthenticator, Response};
use tracing::{debug, error, info, warn};

use crate::commissioner::CommissionerController;
use crate::error::GatewayError;
use crate::joiner::JoinerAdmission;
use crate::lock::SharedStack;
use crate::network::NetworkFormer;
use crate::platform::Platform;
use crate::sink::ResponseSink;
use crate::stack::MeshStack;

/// What the serial worker should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep reading lines.
    Continue,
    /// The device is restarting; stop reading.
    Restart,
}

/// Routes command lines to the gateway components.
pub struct Dispatcher<S> {
    auth: CommandAuthenticator,
    stack: SharedStack<S>,
    commissioner: Arc<CommissionerController>,
    admission: JoinerAdmission<S>,
    former: NetworkFormer<S>,
    platform: Arc<dyn Platform>,
    sink: Arc<dyn ResponseSink>,
    commissioner_timeout: Duration,
    joiner_timeout_secs: u32,
}

impl<S: MeshStack> Dispatcher<S> {
    /// Assemble a dispatcher from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: CommandAuthenticator,
        stack: SharedStack<S>,
        commissioner: Arc<CommissionerController>,
        admission: JoinerAdmission<S>,
        former: NetworkFormer<S>,
        platform: Arc<dyn Platform>,
        sink: Arc<dyn ResponseSink>,
        commissioner_timeout: Duration,
        joiner_timeout_secs: u32,
    ) -> Self {
        Dispatcher {
            auth,
            stack,
            commissioner,
            admission,
            former,
            platform,
            sink,
            commissioner_timeout,
            joiner_timeout_secs,
        }
    }

    /// Labels identifying this gateway in metrics.
    pub fn labels(&self) -> &GatewayLabels {
        self.stack.labels()
    }

    /// Handle one command line.
    pub fn dispatch(&self, line: &str) -> Dispatch {
        debug!(target: "UART_RX", "processing line, {} bytes", line.len());

        if let Some(parsed) = Command::parse_unsigned(line) {
            match parsed {
                Ok(command) => return self.run(command),
                Err(e) => {
                    warn!(target: "UART_RX", "{}", e);
                    return Dispatch::Continue;
                }
            }
        }

        let body = match self.auth.verify(line) {
            Ok(body) => body,
            Err(e) => {
                self.reject(&e);
                return Dispatch::Continue;
            }
        };

        match Command::parse_signed(body) {
            Ok(Some(command)) => self.run(command),
            Ok(None) => {
                debug!(target: "UART_RX", "ignoring unknown verb");
                Dispatch::Continue
            }
            Err(e) => {
                warn!(target: "UART_RX", "{}", e);
                Dispatch::Continue
            }
        }
    }

    fn reject(&self, reason: &AuthError) {
        warn!(target: "SECURITY", "rejected command: {}", reason);
        let reason = match reason {
            AuthError::NoSignature => "no_signature",
            AuthError::SignatureMismatch => "mismatch",
            AuthError::InvalidKey => "invalid_key",
        };
        let labels = self.stack.labels().with(&[("reason", reason.to_string())]);
        metrics::counter!(metric_defs::AUTH_REJECTED.name, &labels).increment(1);
        self.sink.send(&Response::SignatureInvalid);
    }

    fn run(&self, command: Command) -> Dispatch {
        match command {
            Command::CommissionerStart => self.commissioner_start(),
            Command::CommissionerStop => self.commissioner_stop(),
            Command::FormNetwork { name } => self.form_network(&name),
            Command::AddJoiner { id, credential } => self.add_joiner(id, &credential),
            Command::FactoryReset => return self.factory_reset(),
        }
        Dispatch::Continue
    }

    fn commissioner_start(&self) {
        let Ok(mut stack) = self.stack.acquire("commissioner_start", self.commissioner_timeout) else {
            return;
        };
        match self.commissioner.start(&mut *stack) {
            Ok(_) => self.sink.send(&Response::CommissionerStarted),
            Err(e) => self.sink.send(&Response::StartFailed { code: e.code.code() }),
        }
    }

    fn commissioner_stop(&self) {
        let Ok(mut stack) = self.stack.acquire("commissioner_stop", self.commissioner_timeout) else {
            return;
        };
        self.commissioner.stop(&mut *stack);
        self.sink.send(&Response::CommissionerStopped);
    }

    fn form_network(&self, name: &str) {
        match self.former.form(name, self.sink.as_ref()) {
            Ok(_) => {}
            Err(GatewayError::Busy(_)) => {}
            Err(e) => {
                error!(target: "THREAD", "network formation failed: {}", e);
                self.sink.send(&Response::FormFailed { code: e.code() });
            }
        }
    }

    fn add_joiner(&self, id: String, credential: &str) {
        let response = match self.admission.admit(&id, credential, self.joiner_timeout_secs) {
            Ok(_) => Response::JoinerAdded { id },
            Err(e) => Response::AddFailed { code: e.code() },
        };
        self.sink.send(&response);
    }

    fn factory_reset(&self) -> Dispatch {
        info!(target: "MAIN", "factory reset");
        if let Err(e) = self.platform.erase_persistent_config() {
            error!(target: "MAIN", "failed to erase persistent config: {}", e);
        }
        self.platform.restart();
        Dispatch::Restart
    }
}
