//! Controller configuration
//!
//! Loaded from the environment (`CONTROLLER_` prefix) layered over an
//! optional config file, with serde defaults for every field.

use anyhow::Result;
use controller_lib::Thresholds;
use serde::Deserialize;

/// Top-level controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Host identity recorded in transition records
    #[serde(default = "default_host")]
    pub host: String,

    /// API server port for health/metrics/state
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Collector scrape endpoint
    #[serde(default = "default_scrape_endpoint")]
    pub scrape_endpoint: String,

    /// Scrape request timeout in seconds
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,

    /// Consecutive scrape failures before an iteration is skipped
    #[serde(default = "default_max_scrape_failures")]
    pub max_scrape_failures: u32,

    /// Loop interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Minimum dwell time between transitions in seconds
    #[serde(default = "default_min_dwell")]
    pub min_dwell_secs: u64,

    /// Trailing window for thrash counting in seconds
    #[serde(default = "default_thrash_window")]
    pub thrash_window_secs: u64,

    /// Applied transitions allowed inside the thrash window
    #[serde(default = "default_max_changes_in_window")]
    pub max_changes_in_window: usize,

    /// Cooldown after thrash detection in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Managed collector configuration file
    #[serde(default = "default_collector_config_path")]
    pub collector_config_path: String,

    /// Directory for timestamped config backups
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,

    /// Controller state document
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Single-instance lock file
    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    /// Transition audit log
    #[serde(default = "default_translog_path")]
    pub transition_log_path: String,

    /// Collector reload command
    #[serde(default = "default_reload_command")]
    pub reload_command: String,

    /// Collector restart command
    #[serde(default = "default_restart_command")]
    pub restart_command: String,

    /// Collector health URL (empty disables the HTTP probe)
    #[serde(default)]
    pub collector_health_url: Option<String>,

    /// Webhook for transition events
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Directory git-committed after each applied change
    #[serde(default)]
    pub git_dir: Option<String>,

    /// Decision thresholds
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8090
}

fn default_scrape_endpoint() -> String {
    "http://localhost:8888/metrics".to_string()
}

fn default_scrape_timeout() -> u64 {
    10
}

fn default_max_scrape_failures() -> u32 {
    3
}

fn default_check_interval() -> u64 {
    30
}

fn default_min_dwell() -> u64 {
    300
}

fn default_thrash_window() -> u64 {
    600
}

fn default_max_changes_in_window() -> usize {
    3
}

fn default_cooldown() -> u64 {
    300
}

fn default_collector_config_path() -> String {
    "/etc/otel/optimization.yaml".to_string()
}

fn default_backup_dir() -> String {
    "/etc/otel/backups".to_string()
}

fn default_state_path() -> String {
    "/var/lib/profile-controller/state.json".to_string()
}

fn default_lock_path() -> String {
    "/var/lib/profile-controller/controller.lock".to_string()
}

fn default_translog_path() -> String {
    "/var/lib/profile-controller/transitions.jsonl".to_string()
}

fn default_reload_command() -> String {
    "systemctl reload otel-collector".to_string()
}

fn default_restart_command() -> String {
    "systemctl restart otel-collector".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        // Serde fills every field from its default fn.
        serde_json::from_str("{}").expect("default config is deserializable")
    }
}

impl ControllerConfig {
    /// Load from `CONTROLLER_CONFIG_FILE` (if set) layered under
    /// `CONTROLLER_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("CONTROLLER_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("CONTROLLER").separator("__"))
            .build()?;

        Ok(settings
            .try_deserialize()
            .unwrap_or_else(|_| ControllerConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = ControllerConfig::default();
        assert_eq!(config.check_interval_secs, 30);
        assert_eq!(config.min_dwell_secs, 300);
        assert_eq!(config.max_changes_in_window, 3);
        assert_eq!(config.max_scrape_failures, 3);
        assert!(config.webhook_url.is_none());
        assert_eq!(config.thresholds.min_coverage, 0.95);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"api_port": 9999, "thresholds": {"max_series": 20000}}"#)
                .unwrap();
        assert_eq!(config.api_port, 9999);
        assert_eq!(config.thresholds.max_series, 20_000);
        assert_eq!(config.check_interval_secs, 30);
    }
}
