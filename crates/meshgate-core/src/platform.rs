//! Host platform capabilities: randomness, restart, persistent storage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::FatalInitError;
use crate::stack::NetworkDataset;

// ============================================================================
// Persistent Store
// ============================================================================

/// Errors raised by a persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is full and must be erased before it can be used.
    #[error("no free pages")]
    NoFreePages,

    /// The store was written in a newer layout and must be erased.
    #[error("new version found")]
    NewVersionFound,

    /// The backing medium failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether erasing the store is expected to fix this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::NoFreePages | StoreError::NewVersionFound)
    }
}

/// Non-volatile storage for network configuration.
pub trait PersistentStore: Send {
    /// Prepare the store for use.
    fn init(&mut self) -> Result<(), StoreError>;

    /// Erase everything in the store.
    fn erase(&mut self) -> Result<(), StoreError>;

    /// Load the persisted active dataset, if any.
    fn load_dataset(&self) -> Result<Option<NetworkDataset>, StoreError>;

    /// Persist `dataset` as the active dataset.
    fn save_dataset(&mut self, dataset: &NetworkDataset) -> Result<(), StoreError>;
}

/// A store shared between the stack (which persists its dataset) and the
/// platform (which erases it on factory reset).
pub type SharedStore = Arc<Mutex<dyn PersistentStore>>;

/// Wrap a store for sharing.
pub fn shared_store<P: PersistentStore + 'static>(store: P) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Initialize `store`, erasing it once if the failure is one an erase fixes.
///
/// Any other failure, or a failure after the erase, is fatal: the caller is
/// expected to restart the device.
pub fn init_store(store: &mut dyn PersistentStore) -> Result<(), FatalInitError> {
    match store.init() {
        Ok(()) => Ok(()),
        Err(e) if e.is_recoverable() => {
            warn!(target: "MAIN", "persistent store unusable ({}), erasing", e);
            store.erase()?;
            store.init()?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// In-memory store. Contents survive a simulated reboot as long as the value
/// itself is kept.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dataset: Option<NetworkDataset>,
    init_failures: VecDeque<StoreError>,
    erase_count: u32,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose next `init` calls fail with `failures`, in order.
    pub fn with_init_failures(failures: impl IntoIterator<Item = StoreError>) -> Self {
        MemoryStore {
            init_failures: failures.into_iter().collect(),
            ..Self::default()
        }
    }

    /// How many times the store was erased.
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }
}

impl PersistentStore for MemoryStore {
    fn init(&mut self) -> Result<(), StoreError> {
        match self.init_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.dataset = None;
        self.erase_count += 1;
        Ok(())
    }

    fn load_dataset(&self) -> Result<Option<NetworkDataset>, StoreError> {
        Ok(self.dataset.clone())
    }

    fn save_dataset(&mut self, dataset: &NetworkDataset) -> Result<(), StoreError> {
        self.dataset = Some(dataset.clone());
        Ok(())
    }
}

// ============================================================================
// Platform
// ============================================================================

/// Device services the gateway needs beyond the mesh stack.
pub trait Platform: Send + Sync {
    /// Fill `buf` with cryptographically strong random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Request a device restart. Does not return control to the command
    /// that asked for it; the serial worker stops after the current line.
    fn restart(&self);

    /// Erase persisted network configuration.
    fn erase_persistent_config(&self) -> Result<(), StoreError>;
}

/// Set when a restart has been requested.
#[derive(Debug, Clone, Default)]
pub struct RestartSignal(Arc<AtomicBool>);

impl RestartSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a restart.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a restart was requested.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the request, after the restart has been carried out.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Platform for a gateway running as a host process.
///
/// Randomness comes from the operating system; a restart is a flag the
/// runner's reboot loop acts on.
pub struct HostPlatform {
    store: SharedStore,
    restart: RestartSignal,
}

impl HostPlatform {
    /// Create a platform over `store`, signalling restarts through `restart`.
    pub fn new(store: SharedStore, restart: RestartSignal) -> Self {
        HostPlatform { store, restart }
    }
}

impl Platform for HostPlatform {
    fn random_bytes(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn restart(&self) {
        info!(target: "MAIN", "restart requested");
        self.restart.request();
    }

    fn erase_persistent_config(&self) -> Result<(), StoreError> {
        self.store.lock().erase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> NetworkDataset {
        NetworkDataset {
            network_name: "lab".into(),
            network_key: [1; 16],
            extended_pan_id: [2; 8],
            pan_id: 3,
            channel: 15,
        }
    }

    #[test]
    fn test_init_store_recovers_by_erasing() {
        let mut store = MemoryStore::with_init_failures([StoreError::NoFreePages]);
        store.save_dataset(&dataset()).unwrap();

        init_store(&mut store).unwrap();
        assert_eq!(store.erase_count(), 1);
        assert_eq!(store.load_dataset().unwrap(), None);
    }

    #[test]
    fn test_init_store_fatal_on_other_errors() {
        let mut store = MemoryStore::with_init_failures([StoreError::Corrupt("bad header".into())]);
        let err = init_store(&mut store).unwrap_err();
        assert!(matches!(err, FatalInitError::Store(StoreError::Corrupt(_))));
        assert_eq!(store.erase_count(), 0);
    }

    #[test]
    fn test_init_store_fatal_when_erase_does_not_help() {
        let mut store =
            MemoryStore::with_init_failures([StoreError::NewVersionFound, StoreError::NewVersionFound]);
        assert!(init_store(&mut store).is_err());
        assert_eq!(store.erase_count(), 1);
    }

    #[test]
    fn test_host_platform_erase_and_restart() {
        let store = shared_store(MemoryStore::new());
        store.lock().save_dataset(&dataset()).unwrap();
        let restart = RestartSignal::new();
        let platform = HostPlatform::new(Arc::clone(&store), restart.clone());

        platform.erase_persistent_config().unwrap();
        assert_eq!(store.lock().load_dataset().unwrap(), None);

        assert!(!restart.is_requested());
        platform.restart();
        assert!(restart.is_requested());
        restart.clear();
        assert!(!restart.is_requested());
    }

    #[test]
    fn test_host_platform_randomness_varies() {
        let platform = HostPlatform::new(shared_store(MemoryStore::new()), RestartSignal::new());
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        platform.random_bytes(&mut a);
        platform.random_bytes(&mut b);
        assert_ne!(a, b);
    }
}
