//! Attach-state bridge.
//!
//! When the device becomes leader of a partition, the commissioner is
//! started automatically so joiners can be admitted without a host command.
//! Losing the partition is only logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::commissioner::CommissionerController;
use crate::lock::WeakStack;
use crate::stack::{DeviceRole, MeshStack, StackEvent, StackEventHandler};

/// Reacts to attach-state notifications on the stack's thread.
pub struct EventBridge<S> {
    stack: WeakStack<S>,
    commissioner: Arc<CommissionerController>,
    lock_timeout: Duration,
}

impl<S: MeshStack> EventBridge<S> {
    /// Create a bridge driving `commissioner`.
    pub fn new(stack: WeakStack<S>, commissioner: Arc<CommissionerController>, lock_timeout: Duration) -> Self {
        EventBridge {
            stack,
            commissioner,
            lock_timeout,
        }
    }

    fn on_attached(&self) {
        let Some(shared) = self.stack.upgrade() else {
            return;
        };
        let Ok(mut stack) = shared.acquire("auto_start", self.lock_timeout) else {
            return;
        };

        let role = stack.device_role();
        if role != DeviceRole::Leader {
            debug!(target: "THREAD", "attached as {}, commissioner left alone", role);
            return;
        }
        if self.commissioner.is_active(&*stack) {
            info!(target: "THREAD", "attached as leader, commissioner already active");
            return;
        }

        info!(target: "THREAD", "attached as leader, starting commissioner");
        if let Err(e) = self.commissioner.start(&mut *stack) {
            warn!(target: "THREAD", "commissioner auto-start failed: {}", e);
        }
    }
}

impl<S: MeshStack + 'static> StackEventHandler for EventBridge<S> {
    fn on_stack_event(&self, event: StackEvent) {
        match event {
            StackEvent::Attached => self.on_attached(),
            StackEvent::Detached => warn!(target: "THREAD", "detached from mesh, no automatic reattach"),
        }
    }
}
