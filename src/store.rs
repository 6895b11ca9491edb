//! State persistence.
//!
//! One JSON document holds the last known state of every entity, keyed by
//! `<device_type>_<device_id>` and then by `entity_id`. Keying by entity ID
//! makes renaming an entity a deliberate (migration-required) operation while
//! renumbering slots stays harmless. Writes are atomic (temp file + rename);
//! a missing file at startup is not an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{BridgeError, Result};

/// Persisted state of one entity. Lights carry a brightness, switches don't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    /// ON/OFF state.
    pub state: bool,
    /// Brightness for lights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

/// Per-device entity states, keyed by `entity_id`.
pub type DeviceState = BTreeMap<String, EntityState>;

/// The on-disk document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    /// When this document was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,

    /// Device states keyed by `<device_type>_<device_id>`.
    #[serde(flatten)]
    pub devices: BTreeMap<String, DeviceState>,
}

/// State file reader/writer.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store for the given path. Nothing is touched until
    /// [`StateStore::load`] or [`StateStore::save`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing file yields an empty document.
    pub fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "no state file, starting empty");
            return Ok(StateDocument::default());
        }

        let raw = fs::read_to_string(&self.path).map_err(BridgeError::StatePersist)?;
        serde_json::from_str(&raw).map_err(|e| {
            BridgeError::StatePersist(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("corrupt state file: {}", e),
            ))
        })
    }

    /// Write the document atomically: serialize to a sibling temp file, then
    /// rename over the target.
    pub fn save(&self, mut document: StateDocument) -> Result<()> {
        document.saved_at = Some(Utc::now());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(BridgeError::StatePersist)?;
            }
        }

        let raw = serde_json::to_string_pretty(&document).map_err(|e| {
            BridgeError::StatePersist(std::io::Error::new(std::io::ErrorKind::Other, e))
        })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw).map_err(BridgeError::StatePersist)?;
        fs::rename(&tmp, &self.path).map_err(BridgeError::StatePersist)?;

        tracing::debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_ID: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> PathBuf {
        let n = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "scheiber-bridge-test-{}-{}.json",
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_missing_file_is_empty_document() {
        let store = StateStore::new(temp_path());
        let doc = store.load().unwrap();
        assert!(doc.devices.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let path = temp_path();
        let store = StateStore::new(&path);

        let mut doc = StateDocument::default();
        let mut device = DeviceState::new();
        device.insert(
            "galley".to_string(),
            EntityState {
                state: true,
                brightness: Some(120),
            },
        );
        device.insert(
            "nav_light".to_string(),
            EntityState {
                state: false,
                brightness: None,
            },
        );
        doc.devices.insert("bloc9_7".to_string(), device);

        store.save(doc).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.saved_at.is_some());
        let device = &loaded.devices["bloc9_7"];
        assert_eq!(device["galley"].brightness, Some(120));
        assert!(device["galley"].state);
        assert_eq!(device["nav_light"].brightness, None);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_switch_entry_serializes_without_brightness() {
        let entry = EntityState {
            state: true,
            brightness: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"state":true}"#);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = temp_path();
        std::fs::write(&path, "not json").unwrap();

        let store = StateStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(BridgeError::StatePersist(_))
        ));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = std::env::temp_dir().join(format!(
            "scheiber-bridge-test-dir-{}",
            std::process::id()
        ));
        let path = dir.join("nested").join("state.json");
        let store = StateStore::new(&path);

        store.save(StateDocument::default()).unwrap();
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
