//! services/api/src/adapters/local_store.rs
//!
//! A `KeyValueStore` persisted as a single JSON object on disk, playing the part
//! of the browser's local storage for this device.

use custodyx_core::ports::{KeyValueStore, PortError, PortResult};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub struct FileKeyValueStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Opens the store at `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> PortResult<Self> {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                PortError::Unexpected(format!("{} is not a storage file: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(PortError::Unexpected(e.to_string())),
        };
        info!(path = %path.display(), "Opened local storage.");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` and writes the result through a temp file and a rename,
    /// so a crash never leaves a half-written file behind.
    fn update<F>(&self, change: F) -> PortResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut items = self
            .items
            .lock()
            .map_err(|_| PortError::Unexpected("local storage lock poisoned".to_string()))?;
        let mut next = items.clone();
        change(&mut next);

        let raw = serde_json::to_string_pretty(&next).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, raw).map_err(|e| PortError::Unexpected(e.to_string()))?;
        fs::rename(&staging, &self.path).map_err(|e| PortError::Unexpected(e.to_string()))?;

        *items = next;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> PortResult<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| PortError::Unexpected("local storage lock poisoned".to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> PortResult<()> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> PortResult<()> {
        self.update(|items| {
            items.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn items_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileKeyValueStore::open(&path).unwrap();
        store.set_item("reports", "[]").unwrap();
        store.set_item("userProfile", r#"{"name":"Jo"}"#).unwrap();
        store.remove_item("reports").unwrap();
        drop(store);

        let reopened = FileKeyValueStore::open(&path).unwrap();
        assert_eq!(reopened.get_item("reports").unwrap(), None);
        assert_eq!(
            reopened.get_item("userProfile").unwrap().as_deref(),
            Some(r#"{"name":"Jo"}"#)
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn a_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "not json").unwrap();

        assert!(FileKeyValueStore::open(&path).is_err());
    }
}
