//! Transition event notifier
//!
//! Best-effort side channel: an optional webhook POST and an optional
//! version-control commit of the configuration directory. A notifier
//! failure is logged and dropped; it never blocks or reverses an
//! applied profile change.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::{Profile, TransitionRecord};

/// Header carrying the event class on webhook posts.
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// Event classes emitted over the webhook.
pub mod event_types {
    pub const PROFILE_TRANSITION: &str = "profile_transition";
    pub const APPLY_FAILURE: &str = "apply_failure";
}

/// A failed apply attempt, surfaced as a distinct alert class.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailureEvent {
    pub timestamp: DateTime<Utc>,
    pub current_profile: Profile,
    pub attempted_profile: Profile,
    pub error: String,
    pub host: String,
}

/// Notifier settings; both channels are optional.
#[derive(Debug, Clone, Default)]
pub struct NotifierConfig {
    /// Webhook receiving transition events as JSON
    pub webhook_url: Option<String>,
    /// Directory committed to git after each applied change
    pub git_dir: Option<PathBuf>,
}

/// Fire-and-forget event broadcaster.
pub struct Notifier {
    config: NotifierConfig,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Broadcast an applied transition.
    pub async fn notify_transition(&self, record: &TransitionRecord) {
        self.post_webhook(event_types::PROFILE_TRANSITION, record)
            .await;
        self.commit_config(&format!(
            "profile: {} -> {} ({})",
            record.from_profile, record.to_profile, record.reason
        ))
        .await;
    }

    /// Broadcast a failed apply attempt.
    pub async fn notify_failure(&self, event: &ApplyFailureEvent) {
        self.post_webhook(event_types::APPLY_FAILURE, event).await;
    }

    async fn post_webhook<T: Serialize>(&self, event_type: &str, payload: &T) {
        let Some(url) = &self.config.webhook_url else {
            return;
        };
        match self
            .http
            .post(url)
            .header(EVENT_TYPE_HEADER, event_type)
            .json(payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(event_type = %event_type, "Webhook delivered");
            }
            Ok(resp) => {
                warn!(
                    event_type = %event_type,
                    status = %resp.status(),
                    "Webhook rejected, skipping"
                );
            }
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "Webhook delivery failed, skipping");
            }
        }
    }

    async fn commit_config(&self, message: &str) {
        let Some(dir) = &self.config.git_dir else {
            return;
        };
        let result = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["add", "-A"])
            .status()
            .await;
        if !matches!(result, Ok(status) if status.success()) {
            warn!(dir = %dir.display(), "git add failed, skipping config commit");
            return;
        }

        match Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["commit", "-m", message, "--allow-empty-message"])
            .status()
            .await
        {
            Ok(status) if status.success() => {
                info!(dir = %dir.display(), "Committed config change");
            }
            Ok(status) => {
                // Nothing staged also lands here; both are benign.
                debug!(dir = %dir.display(), code = ?status.code(), "git commit skipped");
            }
            Err(e) => {
                warn!(error = %e, "git commit failed, skipping");
            }
        }
    }
}
