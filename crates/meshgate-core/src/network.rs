//! Network formation.
//!
//! Forming wipes whatever network the device belonged to and starts a new
//! one from freshly generated key material.

use std::sync::Arc;
use std::time::Duration;

use meshgate_metrics::metric_defs;
use meshgate_protocol::Response;
use tracing::{info, warn};

use crate::error::{GatewayError, StackErrorCode};
use crate::lock::SharedStack;
use crate::platform::Platform;
use crate::sink::ResponseSink;
use crate::stack::{truncate_network_name, MeshStack, NetworkDataset};

/// Build a dataset for a new network called `name` on `channel`.
///
/// Key material and identifiers come from the platform's cryptographic
/// random source; the name is truncated to the stack's limit.
pub fn generate_dataset(name: &str, channel: u8, platform: &dyn Platform) -> NetworkDataset {
    let mut network_key = [0u8; 16];
    let mut extended_pan_id = [0u8; 8];
    let mut pan_id = [0u8; 2];
    platform.random_bytes(&mut network_key);
    platform.random_bytes(&mut extended_pan_id);
    platform.random_bytes(&mut pan_id);

    NetworkDataset {
        network_name: truncate_network_name(name).to_string(),
        network_key,
        extended_pan_id,
        pan_id: u16::from_le_bytes(pan_id),
        channel,
    }
}

/// Forms networks and brings persisted ones back up at boot.
pub struct NetworkFormer<S> {
    stack: SharedStack<S>,
    platform: Arc<dyn Platform>,
    channel: u8,
    lock_timeout: Duration,
}

impl<S> Clone for NetworkFormer<S> {
    fn clone(&self) -> Self {
        NetworkFormer {
            stack: self.stack.clone(),
            platform: Arc::clone(&self.platform),
            channel: self.channel,
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<S: MeshStack> NetworkFormer<S> {
    /// Create a former using `channel` for new networks.
    pub fn new(stack: SharedStack<S>, platform: Arc<dyn Platform>, channel: u8, lock_timeout: Duration) -> Self {
        NetworkFormer {
            stack,
            platform,
            channel,
            lock_timeout,
        }
    }

    /// Replace the current network with a new one called `name`.
    ///
    /// `NETWORK_FORMED` is sent to `sink` while the stack lock is still
    /// held. A stack failure stops the sequence where it happened; the lock
    /// is released either way.
    pub fn form(&self, name: &str, sink: &dyn ResponseSink) -> Result<NetworkDataset, GatewayError> {
        let mut stack = self.stack.acquire("form_net", self.lock_timeout)?;

        stack.factory_reset_dataset()?;
        let dataset = generate_dataset(name, self.channel, self.platform.as_ref());
        stack.set_active_dataset(&dataset)?;
        stack.enable_interfaces()?;

        info!(
            target: "THREAD",
            "network {:?} formed on channel {}, pan id {:#06x}",
            dataset.network_name, dataset.channel, dataset.pan_id
        );
        metrics::counter!(metric_defs::NETWORK_FORMED.name, &self.stack.labels().to_labels()).increment(1);
        sink.send(&Response::NetworkFormed);
        Ok(dataset)
    }

    /// Enable the interfaces if a dataset survived from a previous boot.
    ///
    /// Returns whether a network was resumed.
    pub fn resume(&self) -> Result<bool, GatewayError> {
        let mut stack = self.stack.acquire("resume", self.lock_timeout)?;
        if !stack.has_active_dataset() {
            info!(target: "THREAD", "no stored network, waiting for FORM_NET");
            return Ok(false);
        }
        match stack.enable_interfaces() {
            Ok(()) => {
                info!(target: "THREAD", "stored network resumed");
                Ok(true)
            }
            Err(e) if e.code == StackErrorCode::Already => Ok(true),
            Err(e) => {
                warn!(target: "THREAD", "could not resume stored network: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{shared_store, HostPlatform, MemoryStore, RestartSignal};
    use crate::sim::{SimStack, StackCall};
    use crate::sink::MemorySink;
    use crate::stack::DeviceRole;
    use meshgate_metrics::GatewayLabels;

    fn platform() -> Arc<dyn Platform> {
        Arc::new(HostPlatform::new(shared_store(MemoryStore::new()), RestartSignal::new()))
    }

    fn former(stack: &SharedStack<SimStack>) -> NetworkFormer<SimStack> {
        NetworkFormer::new(stack.clone(), platform(), 15, Duration::from_secs(5))
    }

    fn shared(stack: SimStack) -> SharedStack<SimStack> {
        SharedStack::new(stack, GatewayLabels::new("test", "none"))
    }

    #[test]
    fn test_form_sequence() {
        let stack = shared(SimStack::new());
        let sink = MemorySink::new();

        let dataset = former(&stack).form("home", &sink).unwrap();
        assert_eq!(dataset.network_name, "home");
        assert_eq!(dataset.channel, 15);
        assert_eq!(sink.take(), vec![Response::NetworkFormed]);

        let mut guard = stack.acquire("check", Duration::from_secs(1)).unwrap();
        assert_eq!(guard.device_role(), DeviceRole::Leader);
        assert_eq!(
            guard.take_journal(),
            vec![StackCall::FactoryResetDataset, StackCall::SetActiveDataset(dataset), StackCall::EnableInterfaces]
        );
    }

    #[test]
    fn test_consecutive_formations_differ_in_key_material() {
        let stack = shared(SimStack::new());
        let sink = MemorySink::new();
        let former = former(&stack);

        let first = former.form("same-name", &sink).unwrap();
        let second = former.form("same-name", &sink).unwrap();

        assert_ne!(first.network_key, second.network_key);
        assert_ne!(first.extended_pan_id, second.extended_pan_id);
        assert_eq!(first.network_name, second.network_name);
        assert_eq!(first.channel, second.channel);
    }

    #[test]
    fn test_long_name_truncated() {
        let dataset = generate_dataset("a-very-long-network-name", 11, platform().as_ref());
        assert_eq!(dataset.network_name, "a-very-long-net");
        assert_eq!(dataset.channel, 11);
    }

    #[test]
    fn test_busy_formation_has_no_side_effects() {
        let stack = shared(SimStack::new());
        let sink = MemorySink::new();
        let former = NetworkFormer::new(stack.clone(), platform(), 15, Duration::from_millis(20));

        let guard = stack.acquire("holder", Duration::from_secs(1)).unwrap();
        let handle = std::thread::spawn(move || {
            let result = former.form("home", &sink).map(|_| ());
            (result, sink.is_empty())
        });
        let (result, sink_empty) = handle.join().unwrap();
        drop(guard);

        assert!(matches!(result, Err(GatewayError::Busy(_))));
        assert!(sink_empty);
        assert!(stack.acquire("check", Duration::from_secs(1)).unwrap().journal().is_empty());
    }

    #[test]
    fn test_stack_failure_releases_lock() {
        let stack = shared(SimStack::new());
        let sink = MemorySink::new();

        // An empty name is refused by the stack when the dataset is set.
        let err = former(&stack).form("", &sink).unwrap_err();
        assert_eq!(err.code(), 7);
        assert!(sink.is_empty());

        let mut guard = stack.acquire("after_failure", Duration::from_millis(10)).unwrap();
        assert!(!guard.interfaces_up());
        let journal = guard.take_journal();
        assert_eq!(journal.len(), 2);
        assert!(matches!(journal[1], StackCall::SetActiveDataset(_)));
    }

    #[test]
    fn test_resume() {
        let store = shared_store(MemoryStore::new());
        let stack = shared(SimStack::with_store(Arc::clone(&store)).unwrap());
        assert!(!former(&stack).resume().unwrap());

        former(&stack).form("kept", &MemorySink::new()).unwrap();
        drop(stack);

        let rebooted = shared(SimStack::with_store(store).unwrap());
        assert!(former(&rebooted).resume().unwrap());
        let guard = rebooted.acquire("check", Duration::from_secs(1)).unwrap();
        assert_eq!(guard.device_role(), DeviceRole::Leader);
        assert_eq!(guard.active_dataset().map(|d| d.network_name.as_str()), Some("kept"));
    }
}
