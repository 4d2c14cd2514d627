//! Config applier
//!
//! Applies a profile change to the live collector configuration as a
//! staged state machine: Locking -> Validating -> Backing-up ->
//! Swapping -> Reloading -> (Success | FallbackRestart | Failed).
//! Each stage returns a typed error; the state store is only updated
//! once a reload or restart has confirmed success, so a failed
//! attempt leaves the old profile authoritative.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApplyError;
use crate::models::{Profile, TransitionRecord};
use crate::process::ManagedProcess;
use crate::store::{atomic_write, StateStore};
use crate::translog::TransitionLog;

/// The managed collector's configuration document. The `profiles`
/// map is opaque to the controller; only the `state` block is edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub profiles: serde_yaml::Value,
    pub state: ConfigStateBlock,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// The `state` block the controller owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigStateBlock {
    pub active_profile: Profile,
    pub last_updated: DateTime<Utc>,
    pub updated_by: String,
    pub update_source: String,
}

/// Applier settings.
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Live collector configuration file
    pub config_path: PathBuf,
    /// Directory receiving timestamped backups
    pub backup_dir: PathBuf,
    /// Reload attempts before falling back to restart (default 3)
    pub reload_attempts: u32,
    /// Backoff between reload attempts
    pub reload_backoff: Duration,
    /// Value written into `state.updated_by`
    pub updated_by: String,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/otel/optimization.yaml"),
            backup_dir: PathBuf::from("/etc/otel/backups"),
            reload_attempts: 3,
            reload_backoff: Duration::from_secs(2),
            updated_by: "profile-controller".to_string(),
        }
    }
}

/// How the change took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMethod {
    Reloaded,
    /// Reload exhausted its retries; the process was restarted.
    Restarted,
}

/// A confirmed, committed profile change.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub method: ApplyMethod,
    pub record: TransitionRecord,
}

/// Exclusive writer lock on the configuration file, held for the
/// duration of one apply attempt. Released on drop.
struct ConfigLock {
    file: File,
}

impl ConfigLock {
    fn acquire(config_path: &Path) -> Result<Self, ApplyError> {
        let lock_path = config_path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ApplyError::LockContention(e.to_string()))?;
        file.try_lock_exclusive()
            .map_err(|_| ApplyError::LockContention("another writer active".to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Staged config applier.
pub struct ConfigApplier {
    config: ApplierConfig,
    process: Arc<dyn ManagedProcess>,
}

impl ConfigApplier {
    pub fn new(config: ApplierConfig, process: Arc<dyn ManagedProcess>) -> Self {
        Self { config, process }
    }

    /// Run one apply attempt end to end. On success the state store
    /// holds the new profile and the transition log has the record;
    /// on any failure the store is untouched.
    pub async fn apply(
        &self,
        store: &mut StateStore,
        translog: &TransitionLog,
        target: Profile,
        reason: &str,
        host: &str,
    ) -> Result<ApplyOutcome, ApplyError> {
        let from = store.current_profile();

        // Locking
        let _lock = ConfigLock::acquire(&self.config.config_path)?;

        // Validating: refuse to write config nobody will read.
        if !self.process.healthy().await {
            return Err(ApplyError::ProcessDown);
        }

        // Backing-up
        self.backup().map_err(ApplyError::BackupFailure)?;

        // Swapping
        let now = Utc::now();
        self.swap(target, now)?;

        // Reloading, with fallback restart.
        let method = self.reload_or_restart(store).await?;

        // Only now does the state store learn about the change.
        let record = TransitionRecord {
            timestamp: now,
            from_profile: from,
            to_profile: target,
            reason: reason.to_string(),
            host: host.to_string(),
        };
        store.commit_transition(record.clone())?;

        if let Err(e) = translog.append(&record) {
            // Audit trail failure must not undo an applied change.
            warn!(error = %e, "Failed to append transition log entry");
        }

        info!(
            event = "profile_transition",
            from = %from,
            to = %target,
            reason = %reason,
            method = ?method,
            "Applied profile transition"
        );

        Ok(ApplyOutcome { method, record })
    }

    fn backup(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.config.backup_dir)?;
        let name = self
            .config
            .config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let backup_path = self.config.backup_dir.join(format!("{name}.{stamp}.bak"));
        fs::copy(&self.config.config_path, &backup_path)?;
        Ok(())
    }

    /// Build the new document in a temp file, validate its syntax,
    /// then atomically rename over the live path. The live file is
    /// never edited in place.
    fn swap(&self, target: Profile, now: DateTime<Utc>) -> Result<(), ApplyError> {
        let raw = fs::read_to_string(&self.config.config_path)
            .map_err(|e| ApplyError::ValidationFailure(format!("cannot read live config: {e}")))?;
        let mut doc: ConfigDocument = serde_yaml::from_str(&raw)
            .map_err(|e| ApplyError::ValidationFailure(format!("live config unparsable: {e}")))?;

        if !profile_exists(&doc.profiles, target) {
            return Err(ApplyError::ValidationFailure(format!(
                "profile {target} not defined in config"
            )));
        }

        doc.state = ConfigStateBlock {
            active_profile: target,
            last_updated: now,
            updated_by: self.config.updated_by.clone(),
            update_source: "adaptive-controller".to_string(),
        };

        let rendered = serde_yaml::to_string(&doc)
            .map_err(|e| ApplyError::ValidationFailure(format!("render failed: {e}")))?;

        // Syntax check of the rendered document before it goes live.
        serde_yaml::from_str::<ConfigDocument>(&rendered)
            .map_err(|e| ApplyError::ValidationFailure(format!("rendered config invalid: {e}")))?;

        atomic_write(&self.config.config_path, rendered.as_bytes())
            .map_err(ApplyError::SwapFailure)?;
        Ok(())
    }

    async fn reload_or_restart(&self, store: &mut StateStore) -> Result<ApplyMethod, ApplyError> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.reload_attempts {
            match self.process.reload().await {
                Ok(()) => return Ok(ApplyMethod::Reloaded),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt,
                        max_attempts = self.config.reload_attempts,
                        error = %e,
                        "Collector reload failed"
                    );
                    if attempt < self.config.reload_attempts {
                        tokio::time::sleep(self.config.reload_backoff).await;
                    }
                }
            }
        }

        warn!(
            attempts = self.config.reload_attempts,
            "Reload exhausted retries, falling back to restart"
        );
        match self.process.restart().await {
            Ok(()) => {
                store.record_restart()?;
                Ok(ApplyMethod::Restarted)
            }
            Err(e) => Err(ApplyError::RestartFailure(format!(
                "reload failed {} times ({last_error}); restart failed: {e}",
                self.config.reload_attempts
            ))),
        }
    }
}

fn profile_exists(profiles: &serde_yaml::Value, target: Profile) -> bool {
    profiles
        .as_mapping()
        .map(|m| m.contains_key(&serde_yaml::Value::String(target.as_str().to_string())))
        .unwrap_or(false)
}
