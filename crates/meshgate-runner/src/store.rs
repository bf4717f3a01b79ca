//! Directory-backed persistent store.
//!
//! Layout:
//! - `store.json`: layout marker holding the format version
//! - `dataset.json`: the active network dataset, if any

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use meshgate_core::{NetworkDataset, PersistentStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Format version written by this build.
pub const STORE_VERSION: u32 = 1;

const MARKER_FILE: &str = "store.json";
const DATASET_FILE: &str = "dataset.json";

/// ENOSPC on Linux and macOS.
const NO_SPACE: i32 = 28;

#[derive(Debug, Serialize, Deserialize)]
struct StoreMarker {
    version: u32,
}

/// Persists network configuration as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// A store rooted at `dir`. Nothing is touched until [`init`](PersistentStore::init).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(MARKER_FILE)
    }

    fn dataset_path(&self) -> PathBuf {
        self.dir.join(DATASET_FILE)
    }

    /// Write `contents` to `path` through a temporary file, so a crash
    /// leaves either the old file or the new one.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(map_write_error)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn map_write_error(e: io::Error) -> StoreError {
    if e.raw_os_error() == Some(NO_SPACE) {
        StoreError::NoFreePages
    } else {
        StoreError::Io(e)
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl PersistentStore for FileStore {
    fn init(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let marker_path = self.marker_path();

        match fs::read(&marker_path) {
            Ok(bytes) => {
                let marker: StoreMarker =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(format!("{}: {}", MARKER_FILE, e)))?;
                if marker.version > STORE_VERSION {
                    return Err(StoreError::NewVersionFound);
                }
                debug!(target: "MAIN", "store at {} (version {})", self.dir.display(), marker.version);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let marker = serde_json::to_vec(&StoreMarker { version: STORE_VERSION })
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Self::write_atomic(&marker_path, &marker)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        remove_if_present(&self.dataset_path())?;
        remove_if_present(&self.marker_path())
    }

    fn load_dataset(&self) -> Result<Option<NetworkDataset>, StoreError> {
        match fs::read(self.dataset_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", DATASET_FILE, e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_dataset(&mut self, dataset: &NetworkDataset) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(dataset).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Self::write_atomic(&self.dataset_path(), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshgate_core::init_store;

    fn dataset() -> NetworkDataset {
        NetworkDataset {
            network_name: "file-net".into(),
            network_key: [0x5a; 16],
            extended_pan_id: [0xa5; 8],
            pan_id: 0x1f2e,
            channel: 15,
        }
    }

    #[test]
    fn test_save_load_erase() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nvs"));
        assert_eq!(store.dir(), dir.path().join("nvs").as_path());
        store.init().unwrap();
        assert_eq!(store.load_dataset().unwrap(), None);

        store.save_dataset(&dataset()).unwrap();
        let reopened = FileStore::new(dir.path().join("nvs"));
        assert_eq!(reopened.load_dataset().unwrap(), Some(dataset()));

        store.erase().unwrap();
        assert_eq!(store.load_dataset().unwrap(), None);
        assert!(!store.marker_path().exists());
        store.erase().unwrap();
    }

    #[test]
    fn test_newer_layout_is_erased_on_init() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE), br#"{"version": 99}"#).unwrap();
        let mut store = FileStore::new(dir.path());
        store.save_dataset(&dataset()).unwrap();

        assert!(matches!(store.init(), Err(StoreError::NewVersionFound)));
        init_store(&mut store).unwrap();
        assert_eq!(store.load_dataset().unwrap(), None);
    }

    #[test]
    fn test_corrupt_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILE), b"not json").unwrap();
        let mut store = FileStore::new(dir.path());
        assert!(init_store(&mut store).is_err());
    }

    #[test]
    fn test_corrupt_dataset_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store.init().unwrap();
        fs::write(dir.path().join(DATASET_FILE), b"{").unwrap();
        assert!(matches!(store.load_dataset(), Err(StoreError::Corrupt(_))));
    }
}
