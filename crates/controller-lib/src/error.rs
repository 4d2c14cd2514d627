//! Error taxonomy for the profile controller
//!
//! Everything below `RestartFailure` is recovered inside the control
//! loop; only storage corruption at startup aborts the process.

use thiserror::Error;

/// Errors raised while sampling the scrape endpoint.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A single metric was missing or unparsable; recovered with the
    /// caller-supplied default.
    #[error("metric {0} unavailable")]
    MetricUnavailable(String),

    /// The endpoint failed across the configured number of consecutive
    /// attempts; the loop iteration is skipped.
    #[error("scrape endpoint unreachable after {attempts} consecutive attempts: {last_error}")]
    EndpointUnreachable { attempts: u32, last_error: String },
}

/// Errors from the config-apply state machine, one variant per stage.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("another writer holds the config lock: {0}")]
    LockContention(String),

    #[error("managed process is not healthy, refusing to write config")]
    ProcessDown,

    #[error("config validation failed: {0}")]
    ValidationFailure(String),

    #[error("reload failed after {attempts} attempts: {last_error}")]
    ReloadFailure { attempts: u32, last_error: String },

    #[error("restart failed after reload exhausted retries: {0}")]
    RestartFailure(String),

    #[error("backup failed: {0}")]
    BackupFailure(#[source] std::io::Error),

    #[error("config swap failed: {0}")]
    SwapFailure(#[source] std::io::Error),

    #[error("state store update failed: {0}")]
    StoreFailure(#[from] StoreError),
}

/// State store failures. Corruption at startup is fatal so a
/// supervisor can restart the controller cleanly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state document corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("state store locked by another controller instance")]
    Locked,
}
