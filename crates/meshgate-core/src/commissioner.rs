//! Commissioner role control.
//!
//! [`CommissionerController`] starts and stops the commissioner on a locked
//! stack. Its notification handler, [`CommissionerEvents`], turns the
//! stack's state and joiner callbacks into one log line each; these records
//! share the serial link with responses, so they are kept short.

use std::sync::Arc;

use meshgate_metrics::{metric_defs, GatewayLabels};
use meshgate_protocol::ExtAddress;
use tracing::{debug, info, warn};

use crate::error::StackError;
use crate::stack::{CommissionerHandler, CommissionerState, JoinerEvent, MeshStack};

/// Log record for a commissioner state change.
pub fn state_record(state: CommissionerState) -> String {
    format!("STATE_CHANGED: {}", state)
}

/// Log record for a joiner event. Unknown joiners render as `UNKNOWN`.
pub fn joiner_record(event: JoinerEvent, joiner: Option<&ExtAddress>) -> String {
    let id = joiner.map_or_else(|| "UNKNOWN".to_string(), ExtAddress::to_string);
    match event {
        JoinerEvent::Unknown(code) => format!("JOINER_EVENT UNKNOWN {}", code),
        known => format!("JOINER_EVENT {} {}", known.name().unwrap_or("UNKNOWN"), id),
    }
}

/// Logs commissioner notifications. Runs on the stack's notification thread
/// and holds no mutable state.
pub struct CommissionerEvents {
    labels: GatewayLabels,
}

impl CommissionerEvents {
    /// Create a handler tagging its metrics with `labels`.
    pub fn new(labels: GatewayLabels) -> Self {
        CommissionerEvents { labels }
    }
}

impl CommissionerHandler for CommissionerEvents {
    fn on_state_changed(&self, state: CommissionerState) {
        info!(target: "COMMISSIONER", "{}", state_record(state));
    }

    fn on_joiner_event(&self, event: JoinerEvent, joiner: Option<ExtAddress>) {
        let record = joiner_record(event, joiner.as_ref());
        match event.name() {
            Some(name) => {
                info!(target: "COMMISSIONER", "{}", record);
                let labels = self.labels.with(&[("event", name.to_ascii_lowercase())]);
                metrics::counter!(metric_defs::COMMISSIONER_EVENTS.name, &labels).increment(1);
            }
            None => warn!(target: "COMMISSIONER", "{}", record),
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The stack was asked to start the commissioner.
    Started,
    /// The commissioner was already active; only the handler was refreshed.
    AlreadyActive,
}

/// Starts, stops and queries the commissioner role.
///
/// Every method takes the stack by mutable reference, which callers obtain
/// from [`SharedStack::acquire`](crate::SharedStack::acquire).
pub struct CommissionerController {
    handler: Arc<dyn CommissionerHandler>,
}

impl CommissionerController {
    /// Create a controller that logs notifications through
    /// [`CommissionerEvents`].
    pub fn new(labels: GatewayLabels) -> Self {
        Self::with_handler(Arc::new(CommissionerEvents::new(labels)))
    }

    /// Create a controller with a custom notification handler.
    pub fn with_handler(handler: Arc<dyn CommissionerHandler>) -> Self {
        CommissionerController { handler }
    }

    /// Start the commissioner unless it is already active.
    ///
    /// The notification handler is registered on every call, so a stack that
    /// lost it (or a controller that was rebuilt) is always wired up. When
    /// the commissioner is already active nothing else happens.
    pub fn start<S: MeshStack + ?Sized>(&self, stack: &mut S) -> Result<StartOutcome, StackError> {
        if stack.commissioner_state() == CommissionerState::Active {
            stack.set_commissioner_handler(Arc::clone(&self.handler));
            info!(target: "COMMISSIONER", "commissioner already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        match stack.commissioner_start(Arc::clone(&self.handler)) {
            Ok(()) => {
                info!(target: "COMMISSIONER", "commissioner start requested");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                warn!(target: "COMMISSIONER", "commissioner start failed: {}", e);
                Err(e)
            }
        }
    }

    /// Stop the commissioner, whatever its current state.
    pub fn stop<S: MeshStack + ?Sized>(&self, stack: &mut S) {
        if let Err(e) = stack.commissioner_stop() {
            debug!(target: "COMMISSIONER", "commissioner stop: {}", e);
        }
        info!(target: "COMMISSIONER", "commissioner stopped");
    }

    /// Whether the commissioner is active.
    pub fn is_active<S: MeshStack + ?Sized>(&self, stack: &S) -> bool {
        stack.commissioner_state() == CommissionerState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackErrorCode;
    use crate::sim::{SimStack, StackCall};

    fn controller() -> CommissionerController {
        CommissionerController::new(GatewayLabels::new("test", "none"))
    }

    #[test]
    fn test_state_records() {
        assert_eq!(state_record(CommissionerState::Disabled), "STATE_CHANGED: DISABLED");
        assert_eq!(state_record(CommissionerState::Petitioning), "STATE_CHANGED: PETITIONING");
        assert_eq!(state_record(CommissionerState::Active), "STATE_CHANGED: ACTIVE");
    }

    #[test]
    fn test_joiner_records() {
        let addr = ExtAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33]);
        assert_eq!(joiner_record(JoinerEvent::Start, Some(&addr)), "JOINER_EVENT START DEADBEEF00112233");
        assert_eq!(joiner_record(JoinerEvent::Connected, Some(&addr)), "JOINER_EVENT CONNECTED DEADBEEF00112233");
        assert_eq!(joiner_record(JoinerEvent::Finalize, None), "JOINER_EVENT FINALIZE UNKNOWN");
        assert_eq!(joiner_record(JoinerEvent::End, None), "JOINER_EVENT END UNKNOWN");
        assert_eq!(joiner_record(JoinerEvent::Removed, Some(&addr)), "JOINER_EVENT REMOVED DEADBEEF00112233");
        assert_eq!(joiner_record(JoinerEvent::Unknown(9), Some(&addr)), "JOINER_EVENT UNKNOWN 9");
    }

    #[test]
    fn test_start_requires_attached_router_or_leader() {
        let mut stack = SimStack::new();
        let err = controller().start(&mut stack).unwrap_err();
        assert_eq!(err.code, StackErrorCode::InvalidState);
        assert_eq!(stack.commissioner_state(), CommissionerState::Disabled);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut stack = SimStack::leader();
        let controller = controller();

        assert_eq!(controller.start(&mut stack).unwrap(), StartOutcome::Started);
        assert!(controller.is_active(&stack));
        assert_eq!(controller.start(&mut stack).unwrap(), StartOutcome::AlreadyActive);
        assert!(controller.is_active(&stack));

        let calls = stack.take_journal();
        assert_eq!(calls, vec![StackCall::CommissionerStart, StackCall::SetCommissionerHandler]);
    }

    #[test]
    fn test_stop_is_unconditional() {
        let mut stack = SimStack::leader();
        let controller = controller();

        controller.stop(&mut stack);
        controller.start(&mut stack).unwrap();
        controller.stop(&mut stack);
        assert!(!controller.is_active(&stack));

        let stops = stack.journal().iter().filter(|c| **c == StackCall::CommissionerStop).count();
        assert_eq!(stops, 2);
    }
}
