//! State Storage Module
//!
//! Persists the monitor's last-known battery state between runs.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::monitor::MonitorState;

/// On-disk store for the monitor state, written with an atomic
/// replace-on-save so a kill mid-write never leaves a torn file.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default state file location under the platform data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("FordPassMonitor")
            .join("battery_monitor_state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous state. A missing or unreadable file yields the
    /// empty baseline, never an error.
    pub fn load(&self) -> MonitorState {
        match self.try_load() {
            Ok(Some(state)) => {
                info!(
                    "Loaded previous state: Range: {:?} miles, Charge: {:?}%",
                    state.last_range, state.last_charge
                );
                state
            }
            Ok(None) => {
                debug!("No previous state at: {:?}", self.path);
                MonitorState::default()
            }
            Err(e) => {
                warn!("Error loading previous state: {}", e);
                MonitorState::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<MonitorState>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path).map_err(|e| StorageError::Io(e.to_string()))?;

        let state =
            serde_json::from_str(&json).map_err(|e| StorageError::Serialization(e.to_string()))?;

        Ok(Some(state))
    }

    /// Save the state: write the full content to a sibling temp file, then
    /// rename it over the canonical path.
    pub fn save(&self, state: &MonitorState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        let json =
            serde_json::to_string(state).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::Io(e.to_string()))?;

        debug!("Saved state to: {:?}", self.path);
        Ok(())
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let state = store.load();
        assert_eq!(state.last_range, None);
        assert_eq!(state.last_charge, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let state = MonitorState {
            last_range: Some(250),
            last_charge: Some(80),
            last_update: "2024-05-01 12:00:00".to_string(),
        };
        store.save(&state).unwrap();

        assert_eq!(store.load(), state);
    }

    #[test]
    fn save_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));

        store.save(&MonitorState::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        store.save(&MonitorState::default()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }

    #[test]
    fn corrupted_file_yields_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let state = StateStore::new(&path).load();
        assert_eq!(state.last_range, None);
        assert_eq!(state.last_charge, None);
    }

    #[test]
    fn state_serializes_to_documented_shape() {
        let state = MonitorState {
            last_range: Some(245),
            last_charge: None,
            last_update: "2024-05-01 12:00:00".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_range"], 245);
        assert_eq!(json["last_charge"], serde_json::Value::Null);
        assert_eq!(json["last_update"], "2024-05-01 12:00:00");
    }
}
