//! Joiner admission.

use std::time::Duration;

use meshgate_metrics::metric_defs;
use meshgate_protocol::JoinerId;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::lock::SharedStack;
use crate::stack::MeshStack;

/// Registers joiner credentials with the commissioner.
pub struct JoinerAdmission<S> {
    stack: SharedStack<S>,
    lock_timeout: Duration,
    log_credentials: bool,
}

impl<S: MeshStack> JoinerAdmission<S> {
    /// Create an admission manager waiting at most `lock_timeout` for the
    /// stack.
    pub fn new(stack: SharedStack<S>, lock_timeout: Duration) -> Self {
        JoinerAdmission {
            stack,
            lock_timeout,
            log_credentials: false,
        }
    }

    /// Include credentials in debug logs.
    pub fn with_credential_logging(mut self, enabled: bool) -> Self {
        self.log_credentials = enabled;
        self
    }

    /// Register `credential` for the joiner named by `id_token` (`*` or 16
    /// hex characters) for `timeout_secs` seconds.
    ///
    /// A malformed identity is rejected before the stack is touched. The
    /// stack lock is held only for the registration call itself.
    pub fn admit(&self, id_token: &str, credential: &str, timeout_secs: u32) -> Result<JoinerId, GatewayError> {
        let labels = self.stack.labels();
        let result = self.try_admit(id_token, credential, timeout_secs);
        match &result {
            Ok(joiner) => {
                info!(target: "JOINER_MGR", "joiner {} added, window {}s", joiner, timeout_secs);
                metrics::counter!(metric_defs::JOINER_ADDED.name, &labels.to_labels()).increment(1);
            }
            Err(e) => {
                warn!(target: "JOINER_MGR", "failed to add joiner {}: {}", id_token, e);
                let labels = labels.with(&[("code", e.code().to_string())]);
                metrics::counter!(metric_defs::JOINER_FAILED.name, &labels).increment(1);
            }
        }
        result
    }

    fn try_admit(&self, id_token: &str, credential: &str, timeout_secs: u32) -> Result<JoinerId, GatewayError> {
        let joiner = JoinerId::parse(id_token)?;
        if self.log_credentials {
            debug!(target: "JOINER_MGR", "joiner {} credential {}", joiner, credential);
        }

        let mut stack = self.stack.acquire("add_joiner", self.lock_timeout)?;
        stack.add_joiner(joiner.address(), credential, timeout_secs)?;
        Ok(joiner)
    }
}
