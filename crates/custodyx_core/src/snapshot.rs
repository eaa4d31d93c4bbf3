//! crates/custodyx_core/src/snapshot.rs
//!
//! Reads the records the application kept in device storage before the user
//! had an account. Each of the four slots is parsed on its own; a slot that is
//! missing or malformed reads as empty without affecting the others.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{LocalSnapshot, UserProfile};
use crate::ports::{KeyValueStore, PortError, PortResult};

pub const REPORTS_KEY: &str = "reports";
pub const DOCUMENTS_KEY: &str = "documents";
pub const TEMPLATES_KEY: &str = "incidentTemplates";
pub const PROFILE_KEY: &str = "userProfile";

pub const SNAPSHOT_KEYS: [&str; 4] = [REPORTS_KEY, DOCUMENTS_KEY, TEMPLATES_KEY, PROFILE_KEY];

/// Why a single slot could not be read. Never leaves this module.
#[derive(Debug, thiserror::Error)]
enum SlotError {
    #[error("storage unavailable: {0}")]
    Storage(#[from] PortError),
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tolerant reader over the device's key/value storage.
#[derive(Clone)]
pub struct SnapshotReader {
    storage: Arc<dyn KeyValueStore>,
}

impl SnapshotReader {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    fn read_slot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SlotError> {
        match self.storage.get_item(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn slot_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.read_slot::<T>(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(slot = key, "Ignoring unreadable local slot: {}", e);
                T::default()
            }
        }
    }

    /// Reads all four slots. Never fails.
    pub fn read_snapshot(&self) -> LocalSnapshot {
        LocalSnapshot {
            reports: self.slot_or_default(REPORTS_KEY),
            documents: self.slot_or_default(DOCUMENTS_KEY),
            incident_templates: self.slot_or_default(TEMPLATES_KEY),
            user_profile: self.slot_or_default::<Option<UserProfile>>(PROFILE_KEY),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.read_snapshot().is_empty()
    }

    /// Removes every slot. Best-effort: failures are logged and skipped.
    pub fn clear(&self) {
        for key in SNAPSHOT_KEYS {
            if let Err(e) = self.storage.remove_item(key) {
                error!(slot = key, "Failed to clear local slot: {}", e);
            }
        }
        info!("Local storage cleared.");
    }

    /// Persists `snapshot` over whatever the device currently holds.
    pub fn write_snapshot(&self, snapshot: &LocalSnapshot) -> PortResult<()> {
        self.write_slot(REPORTS_KEY, &snapshot.reports)?;
        self.write_slot(DOCUMENTS_KEY, &snapshot.documents)?;
        self.write_slot(TEMPLATES_KEY, &snapshot.incident_templates)?;
        match &snapshot.user_profile {
            Some(profile) => self.write_slot(PROFILE_KEY, profile),
            None => self.storage.remove_item(PROFILE_KEY),
        }
    }

    fn write_slot<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> PortResult<()> {
        let raw = serde_json::to_string(value).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.storage.set_item(key, &raw)
    }
}
