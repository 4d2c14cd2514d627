//! Core data models for the profile controller

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum transition records kept in controller state
pub const TRANSITION_RING_CAP: usize = 50;

/// Maximum age of a retained transition record (24 hours)
pub const TRANSITION_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Named optimization profile, ordered by filtering aggressiveness.
///
/// The controller never inspects the filtering parameters a profile
/// maps to; it only moves along this linear ladder one tier at a time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Conservative,
    Balanced,
    Aggressive,
    Emergency,
}

impl Profile {
    /// All tiers in ladder order.
    pub const LADDER: [Profile; 4] = [
        Profile::Conservative,
        Profile::Balanced,
        Profile::Aggressive,
        Profile::Emergency,
    ];

    /// Position in the severity ladder (0 = conservative).
    pub fn ordinal(self) -> usize {
        match self {
            Profile::Conservative => 0,
            Profile::Balanced => 1,
            Profile::Aggressive => 2,
            Profile::Emergency => 3,
        }
    }

    /// One tier more aggressive, saturating at `Emergency`.
    pub fn escalate(self) -> Profile {
        match self {
            Profile::Conservative => Profile::Balanced,
            Profile::Balanced => Profile::Aggressive,
            Profile::Aggressive | Profile::Emergency => Profile::Emergency,
        }
    }

    /// One tier less aggressive, saturating at `Conservative`.
    pub fn deescalate(self) -> Profile {
        match self {
            Profile::Emergency => Profile::Aggressive,
            Profile::Aggressive => Profile::Balanced,
            Profile::Balanced | Profile::Conservative => Profile::Conservative,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Conservative => "conservative",
            Profile::Balanced => "balanced",
            Profile::Aggressive => "aggressive",
            Profile::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Profile::Conservative),
            "balanced" => Ok(Profile::Balanced),
            "aggressive" => Ok(Profile::Aggressive),
            "emergency" => Ok(Profile::Emergency),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

/// One sampled set of pipeline KPIs, taken once per loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub total_series: u64,
    pub kept_series: u64,
    pub coverage_critical: f64,
    pub cost_per_hour: f64,
    pub cpu_utilization: f64,
    pub memory_mb: f64,
    pub anomaly_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl KpiSnapshot {
    /// Normalize raw values into a valid snapshot: `kept <= total`,
    /// coverage clamped to [0, 1], negatives floored at zero.
    #[allow(clippy::too_many_arguments)]
    pub fn normalized(
        total_series: u64,
        kept_series: u64,
        coverage_critical: f64,
        cost_per_hour: f64,
        cpu_utilization: f64,
        memory_mb: f64,
        anomaly_count: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            total_series,
            kept_series: kept_series.min(total_series),
            coverage_critical: coverage_critical.clamp(0.0, 1.0),
            cost_per_hour: cost_per_hour.max(0.0),
            cpu_utilization: cpu_utilization.max(0.0),
            memory_mb: memory_mb.max(0.0),
            anomaly_count,
            timestamp,
        }
    }
}

/// Decision thresholds for the priority ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum acceptable critical-process coverage
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
    /// Hourly cost budget in dollars
    #[serde(default = "default_max_cost_per_hour")]
    pub max_cost_per_hour: f64,
    /// Hard ceiling on exported series
    #[serde(default = "default_max_series")]
    pub max_series: u64,
    /// Target exported series count
    #[serde(default = "default_target_series")]
    pub target_series: u64,
    /// Anomaly count above which aggressive filtering is unsafe
    #[serde(default = "default_anomaly_surge_threshold")]
    pub anomaly_surge_threshold: u64,
}

fn default_min_coverage() -> f64 {
    0.95
}

fn default_max_cost_per_hour() -> f64 {
    0.10
}

fn default_max_series() -> u64 {
    10_000
}

fn default_target_series() -> u64 {
    5_000
}

fn default_anomaly_surge_threshold() -> u64 {
    10
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
            max_cost_per_hour: default_max_cost_per_hour(),
            max_series: default_max_series(),
            target_series: default_target_series(),
            anomaly_surge_threshold: default_anomaly_surge_threshold(),
        }
    }
}

/// One applied profile change, kept for audit and thrash counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub from_profile: Profile,
    pub to_profile: Profile,
    pub reason: String,
    pub host: String,
}

/// Durable controller state, owned by exactly one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub current_profile: Profile,
    pub last_change: DateTime<Utc>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
    #[serde(default)]
    pub restart_count: u64,
}

impl ControllerState {
    /// Fresh state starting at the given profile.
    pub fn initial(profile: Profile, now: DateTime<Utc>) -> Self {
        Self {
            current_profile: profile,
            last_change: now,
            transitions: Vec::new(),
            restart_count: 0,
        }
    }

    /// Append a transition and evict entries past the ring's size or
    /// age cutoff.
    pub fn push_transition(&mut self, record: TransitionRecord) {
        self.transitions.push(record);
        let cutoff = Utc::now() - Duration::seconds(TRANSITION_MAX_AGE_SECS);
        self.transitions.retain(|t| t.timestamp >= cutoff);
        if self.transitions.len() > TRANSITION_RING_CAP {
            let excess = self.transitions.len() - TRANSITION_RING_CAP;
            self.transitions.drain(..excess);
        }
    }

    /// Number of transitions applied within the trailing window.
    pub fn transitions_in_window(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        self.transitions
            .iter()
            .filter(|t| t.timestamp >= cutoff)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_ladder_is_ordered() {
        assert!(Profile::Conservative < Profile::Balanced);
        assert!(Profile::Balanced < Profile::Aggressive);
        assert!(Profile::Aggressive < Profile::Emergency);
    }

    #[test]
    fn test_escalate_saturates_at_emergency() {
        assert_eq!(Profile::Aggressive.escalate(), Profile::Emergency);
        assert_eq!(Profile::Emergency.escalate(), Profile::Emergency);
    }

    #[test]
    fn test_deescalate_saturates_at_conservative() {
        assert_eq!(Profile::Balanced.deescalate(), Profile::Conservative);
        assert_eq!(Profile::Conservative.deescalate(), Profile::Conservative);
    }

    #[test]
    fn test_profile_round_trips_through_str() {
        for profile in Profile::LADDER {
            let parsed: Profile = profile.as_str().parse().unwrap();
            assert_eq!(parsed, profile);
        }
        assert!("turbo".parse::<Profile>().is_err());
    }

    #[test]
    fn test_snapshot_normalization_enforces_invariants() {
        let snap = KpiSnapshot::normalized(100, 250, 1.7, -0.5, -1.0, -2.0, 3, Utc::now());
        assert_eq!(snap.kept_series, 100);
        assert_eq!(snap.coverage_critical, 1.0);
        assert_eq!(snap.cost_per_hour, 0.0);
        assert_eq!(snap.cpu_utilization, 0.0);
        assert_eq!(snap.memory_mb, 0.0);
    }

    #[test]
    fn test_transition_ring_evicts_oldest_past_cap() {
        let mut state = ControllerState::initial(Profile::Balanced, Utc::now());
        for i in 0..(TRANSITION_RING_CAP + 10) {
            state.push_transition(TransitionRecord {
                timestamp: Utc::now(),
                from_profile: Profile::Balanced,
                to_profile: Profile::Aggressive,
                reason: format!("change {i}"),
                host: "node-1".to_string(),
            });
        }
        assert_eq!(state.transitions.len(), TRANSITION_RING_CAP);
        // The oldest entries were the ones evicted.
        assert_eq!(state.transitions[0].reason, "change 10");
    }

    #[test]
    fn test_transitions_in_window_counts_only_recent() {
        let now = Utc::now();
        let mut state = ControllerState::initial(Profile::Balanced, now);
        for minutes_ago in [1, 2, 20] {
            state.push_transition(TransitionRecord {
                timestamp: now - Duration::minutes(minutes_ago),
                from_profile: Profile::Balanced,
                to_profile: Profile::Aggressive,
                reason: "test".to_string(),
                host: "node-1".to_string(),
            });
        }
        assert_eq!(state.transitions_in_window(now, Duration::minutes(10)), 2);
        assert_eq!(state.transitions_in_window(now, Duration::minutes(30)), 3);
    }
}
