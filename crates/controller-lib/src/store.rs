//! Durable controller state
//!
//! A single JSON document on stable storage holding the current
//! profile, last-change timestamp, bounded transition history, and
//! the restart counter. Every save is write-temp-then-atomic-rename
//! so readers never observe a partial document.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{ControllerState, Profile, TransitionRecord};

/// File-backed state store. Mutation funnels through the config
/// applier's success path; nothing else writes the document.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: ControllerState,
}

impl StateStore {
    /// Load the state document, creating it with the default profile
    /// on first run. A corrupt document is fatal: the supervisor is
    /// expected to intervene rather than have the controller guess.
    pub fn open(path: impl Into<PathBuf>, default_profile: Profile) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => {
                let state: ControllerState = serde_json::from_str(&raw)?;
                info!(
                    path = %path.display(),
                    profile = %state.current_profile,
                    "Loaded controller state"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = ControllerState::initial(default_profile, Utc::now());
                info!(
                    path = %path.display(),
                    profile = %default_profile,
                    "Initialized controller state"
                );
                let store = Self {
                    path: path.clone(),
                    state,
                };
                store.persist()?;
                return Ok(store);
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(Self { path, state })
    }

    /// Read-only view of the current state.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn current_profile(&self) -> Profile {
        self.state.current_profile
    }

    /// Commit an applied transition: profile, timestamp, and history
    /// move together or not at all.
    pub fn commit_transition(&mut self, record: TransitionRecord) -> Result<(), StoreError> {
        let previous = self.state.clone();

        self.state.current_profile = record.to_profile;
        self.state.last_change = record.timestamp;
        self.state.push_transition(record);

        if let Err(e) = self.persist() {
            warn!(error = %e, "State persist failed, rolling back in-memory state");
            self.state = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Record a fallback restart of the managed process.
    pub fn record_restart(&mut self) -> Result<(), StoreError> {
        self.state.restart_count += 1;
        self.persist()
    }

    /// Remove the document entirely. Only used by explicit reset.
    pub fn reset(self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(&self.state)?;
        atomic_write(&self.path, &data).map_err(StoreError::Io)
    }
}

/// Write bytes to a temp file in the target's directory, then rename
/// over the destination. Readers see the old content or the new,
/// never a truncated file.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string()),
        std::process::id()
    ));
    fs::write(&tmp, data)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(to: Profile) -> TransitionRecord {
        TransitionRecord {
            timestamp: Utc::now(),
            from_profile: Profile::Balanced,
            to_profile: to,
            reason: "test".to_string(),
            host: "node-1".to_string(),
        }
    }

    #[test]
    fn test_open_initializes_with_default_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::open(&path, Profile::Balanced).unwrap();
        assert_eq!(store.current_profile(), Profile::Balanced);
        assert!(path.exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::open(&path, Profile::Balanced).unwrap();
        store.commit_transition(record(Profile::Aggressive)).unwrap();
        store.record_restart().unwrap();
        drop(store);

        let store = StateStore::open(&path, Profile::Conservative).unwrap();
        assert_eq!(store.current_profile(), Profile::Aggressive);
        assert_eq!(store.state().restart_count, 1);
        assert_eq!(store.state().transitions.len(), 1);
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();

        let result = StateStore::open(&path, Profile::Balanced);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_commit_updates_profile_and_history_together() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::open(&path, Profile::Balanced).unwrap();
        store.commit_transition(record(Profile::Aggressive)).unwrap();

        assert_eq!(store.current_profile(), Profile::Aggressive);
        assert_eq!(store.state().transitions.len(), 1);
        assert_eq!(
            store.state().last_change,
            store.state().transitions[0].timestamp
        );
    }

    #[test]
    fn test_atomic_write_replaces_content_fully() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second version").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second version");

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_reset_removes_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::open(&path, Profile::Balanced).unwrap();
        store.reset().unwrap();
        assert!(!path.exists());
    }
}
