//! Serialized access to the mesh stack.
//!
//! The stack is one process-wide handle used from two threads: the serial
//! worker and the stack's own notification thread. Every call into it goes
//! through [`SharedStack::acquire`], which waits a bounded time and hands out
//! a guard that releases the lock when dropped, on every exit path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use meshgate_metrics::{metric_defs, GatewayLabels};
use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::BusyError;

/// Scoped access to the stack. The lock is released on drop.
pub type StackGuard<'a, S> = MutexGuard<'a, S>;

/// Shared, lock-protected handle to the mesh stack.
pub struct SharedStack<S> {
    inner: Arc<Mutex<S>>,
    labels: Arc<GatewayLabels>,
}

impl<S> Clone for SharedStack<S> {
    fn clone(&self) -> Self {
        SharedStack {
            inner: Arc::clone(&self.inner),
            labels: Arc::clone(&self.labels),
        }
    }
}

impl<S> SharedStack<S> {
    /// Wrap a stack handle. `labels` tag the metrics recorded by its users.
    pub fn new(stack: S, labels: GatewayLabels) -> Self {
        SharedStack {
            inner: Arc::new(Mutex::new(stack)),
            labels: Arc::new(labels),
        }
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// `operation` names the caller in the busy log line and metric.
    pub fn acquire(&self, operation: &'static str, timeout: Duration) -> Result<StackGuard<'_, S>, BusyError> {
        match self.inner.try_lock_for(timeout) {
            Some(guard) => Ok(guard),
            None => {
                warn!(target: "THREAD", "stack lock busy, {} abandoned after {:?}", operation, timeout);
                let labels = self.labels.with(&[("operation", operation.to_string())]);
                metrics::counter!(metric_defs::LOCK_BUSY.name, &labels).increment(1);
                Err(BusyError { operation, timeout })
            }
        }
    }

    /// Labels identifying this gateway in metrics.
    pub fn labels(&self) -> &GatewayLabels {
        &self.labels
    }

    /// A handle that does not keep the stack alive.
    ///
    /// Notification handlers registered with the stack hold one of these so
    /// the stack does not end up owning itself.
    pub fn downgrade(&self) -> WeakStack<S> {
        WeakStack {
            inner: Arc::downgrade(&self.inner),
            labels: Arc::clone(&self.labels),
        }
    }
}

/// Non-owning counterpart of [`SharedStack`].
pub struct WeakStack<S> {
    inner: Weak<Mutex<S>>,
    labels: Arc<GatewayLabels>,
}

impl<S> WeakStack<S> {
    /// Get a [`SharedStack`] back, if the stack still exists.
    pub fn upgrade(&self) -> Option<SharedStack<S>> {
        self.inner.upgrade().map(|inner| SharedStack {
            inner,
            labels: Arc::clone(&self.labels),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn shared(value: u32) -> SharedStack<u32> {
        SharedStack::new(value, GatewayLabels::new("test", "none"))
    }

    #[test]
    fn test_acquire_uncontended() {
        let stack = shared(7);
        let mut guard = stack.acquire("test", Duration::from_millis(10)).unwrap();
        *guard += 1;
        drop(guard);
        assert_eq!(*stack.acquire("test", Duration::from_millis(10)).unwrap(), 8);
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let stack = shared(0);
        let other = stack.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = thread::spawn(move || {
            let _guard = other.acquire("holder", Duration::from_secs(1)).unwrap();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });

        locked_rx.recv().unwrap();
        let err = stack.acquire("waiter", Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.operation, "waiter");
        assert_eq!(err.timeout, Duration::from_millis(20));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(stack.acquire("waiter", Duration::from_millis(20)).is_ok());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn fails(stack: &SharedStack<u32>) -> Result<(), &'static str> {
            let _guard = stack.acquire("fails", Duration::from_millis(10)).map_err(|_| "busy")?;
            Err("stack call failed")
        }

        let stack = shared(0);
        assert_eq!(fails(&stack), Err("stack call failed"));
        assert!(stack.acquire("after", Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_weak_handle() {
        let stack = shared(1);
        let weak = stack.downgrade();
        assert!(weak.upgrade().is_some());
        drop(stack);
        assert!(weak.upgrade().is_none());
    }
}
