//! Persistence backends
//!
//! The registry only knows the [`RegistryStore`] trait. The daemon uses
//! [`JsonFileStore`]; tests use [`MemoryStore`] and inspect what was saved.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{RegistryData, RegistryError};

/// Load/save backend for [`RegistryData`]
pub trait RegistryStore: Send {
    /// Load persisted data, `None` when nothing was saved yet
    fn load(&mut self) -> Result<Option<RegistryData>, RegistryError>;

    fn save(&mut self, data: &RegistryData) -> Result<(), RegistryError>;
}

/// Pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<RegistryData>, RegistryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&mut self, data: &RegistryData) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        // Atomic replace
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved registry to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store; clones share the same contents and save counter
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Option<RegistryData>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with data, as if loaded from disk
    pub fn with_data(data: RegistryData) -> Self {
        Self {
            data: Arc::new(Mutex::new(Some(data))),
            saves: Arc::default(),
        }
    }

    /// Number of completed saves
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved contents
    pub fn saved(&self) -> Option<RegistryData> {
        self.data.lock().ok().and_then(|data| data.clone())
    }
}

impl RegistryStore for MemoryStore {
    fn load(&mut self) -> Result<Option<RegistryData>, RegistryError> {
        Ok(self.saved())
    }

    fn save(&mut self, data: &RegistryData) -> Result<(), RegistryError> {
        if let Ok(mut slot) = self.data.lock() {
            *slot = Some(data.clone());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("nested").join("registry.json"));
        assert!(store.load().unwrap().is_none());

        let mut data = RegistryData::default();
        data.ssr.base_address = 32;
        store.save(&data).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.ssr.base_address, 32);
    }

    #[test]
    fn test_json_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "not json").unwrap();
        let mut store = JsonFileStore::new(path);
        assert!(matches!(store.load(), Err(RegistryError::Serialize(_))));
    }

    #[test]
    fn test_memory_store_shares_state() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer.save(&RegistryData::default()).unwrap();
        assert_eq!(store.saves(), 1);
        assert!(store.saved().is_some());
    }
}
