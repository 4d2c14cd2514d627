//! Hysteresis guard for proposed profile transitions
//!
//! Blocks changes that arrive before the minimum dwell time has
//! elapsed and detects thrashing (too many transitions in a trailing
//! window). Anomaly-surge-forced transitions bypass the dwell check
//! but still respect the thrash cooldown.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::ControllerState;

/// Guard configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Minimum time a profile must stay active (default 300s)
    pub min_dwell: Duration,
    /// Trailing window for thrash counting (default 600s)
    pub thrash_window: Duration,
    /// Applied transitions allowed inside the window (default 3)
    pub max_changes_in_window: usize,
    /// How long the loop backs off after thrash detection (default 300s)
    pub cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_dwell: Duration::seconds(300),
            thrash_window: Duration::seconds(600),
            max_changes_in_window: 3,
            cooldown: Duration::seconds(300),
        }
    }
}

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Transition may proceed to the config applier.
    Allow,
    /// Transition blocked; re-evaluate next iteration.
    Reject { reason: String },
    /// Thrashing detected; the caller must sleep the cooldown before
    /// evaluating at all.
    Cooldown { reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Stateless filter over the durable controller state.
#[derive(Debug, Clone)]
pub struct HysteresisGuard {
    config: GuardConfig,
}

impl HysteresisGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn cooldown(&self) -> Duration {
        self.config.cooldown
    }

    /// Decide whether a proposed transition may be applied now.
    pub fn allow(
        &self,
        proposed: crate::models::Profile,
        forced: bool,
        state: &ControllerState,
        now: DateTime<Utc>,
    ) -> Verdict {
        if proposed == state.current_profile {
            return Verdict::Reject {
                reason: "proposed profile equals current profile".to_string(),
            };
        }

        // Thrash check first: it binds even forced transitions, so a
        // bursty anomaly signal cannot make the controller itself
        // unstable.
        let recent = state.transitions_in_window(now, self.config.thrash_window);
        if recent >= self.config.max_changes_in_window {
            let reason = format!(
                "{recent} transitions in the last {}s, cooling down for {}s",
                self.config.thrash_window.num_seconds(),
                self.config.cooldown.num_seconds()
            );
            warn!(
                event = "thrash_detected",
                recent_transitions = recent,
                window_secs = self.config.thrash_window.num_seconds(),
                "Transition blocked: thrashing"
            );
            return Verdict::Cooldown { reason };
        }

        let elapsed = now - state.last_change;
        if elapsed < self.config.min_dwell {
            if forced {
                debug!(
                    elapsed_secs = elapsed.num_seconds(),
                    "Dwell time not elapsed, allowing forced transition"
                );
                return Verdict::Allow;
            }
            let reason = format!(
                "dwell time not elapsed ({}s of {}s)",
                elapsed.num_seconds(),
                self.config.min_dwell.num_seconds()
            );
            debug!(
                elapsed_secs = elapsed.num_seconds(),
                min_dwell_secs = self.config.min_dwell.num_seconds(),
                "Transition blocked: dwell time"
            );
            return Verdict::Reject { reason };
        }

        Verdict::Allow
    }
}
