//! Profile decision engine
//!
//! A pure, deterministic priority ladder mapping a KPI snapshot plus
//! the current profile to a target profile. The first matching rule
//! wins; every move is exactly one tier, so behavior stays auditable.

use crate::models::{KpiSnapshot, Profile, Thresholds};

/// Reason strings surfaced to operators. Shared with tests so the
/// wording never drifts.
pub mod reasons {
    pub const COST_EMERGENCY: &str = "cost emergency";
    pub const COVERAGE_BELOW_MINIMUM: &str = "coverage below minimum";
    pub const SERIES_CEILING: &str = "series count exceeds ceiling";
    pub const COST_ABOVE_BUDGET: &str = "cost above budget";
    pub const HEADROOM_AVAILABLE: &str = "headroom available";
    pub const ANOMALY_SURGE: &str = "anomaly surge";
}

/// Outcome of one decision evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub target: Profile,
    pub reason: String,
    /// Anomaly-surge transitions bypass the dwell-time check (they
    /// still respect the thrash cooldown).
    pub forced: bool,
}

impl Decision {
    fn no_change(current: Profile) -> Self {
        Self {
            target: current,
            reason: String::new(),
            forced: false,
        }
    }

    fn step(target: Profile, reason: &str) -> Self {
        Self {
            target,
            reason: reason.to_string(),
            forced: false,
        }
    }

    /// True when the decision proposes an actual change.
    pub fn is_change(&self, current: Profile) -> bool {
        self.target != current
    }
}

/// Evaluate the priority ladder. Pure and idempotent: the same inputs
/// always produce the same decision.
pub fn decide(current: Profile, snapshot: &KpiSnapshot, thresholds: &Thresholds) -> Decision {
    let ladder = evaluate_ladder(current, snapshot, thresholds);

    // Anomaly surge override: under heavy filtering the anomaly
    // detectors themselves become unreliable, so a surge pulls the
    // controller back toward balanced even when the ladder wants to
    // escalate. One tier per decision still holds; convergence from
    // emergency takes successive forced cycles.
    if snapshot.anomaly_count > thresholds.anomaly_surge_threshold
        && ladder.target >= Profile::Aggressive
    {
        if current > Profile::Balanced {
            return Decision {
                target: current.deescalate(),
                reason: reasons::ANOMALY_SURGE.to_string(),
                forced: true,
            };
        }
        // Current is already at or below balanced; suppress the
        // escalation instead of inverting it.
        return Decision::no_change(current);
    }

    ladder
}

fn evaluate_ladder(current: Profile, snapshot: &KpiSnapshot, thresholds: &Thresholds) -> Decision {
    // 1. Cost emergency: escalate regardless of coverage.
    if snapshot.cost_per_hour > 2.0 * thresholds.max_cost_per_hour {
        return step_up(current, reasons::COST_EMERGENCY);
    }

    // 2. Coverage protection: losing sight of critical processes
    //    outweighs cost.
    if snapshot.coverage_critical < thresholds.min_coverage {
        return step_down(current, reasons::COVERAGE_BELOW_MINIMUM);
    }

    // 3. Series ceiling.
    if snapshot.kept_series > thresholds.max_series {
        return step_up(current, reasons::SERIES_CEILING);
    }

    // 4. Cost optimization with healthy coverage.
    if snapshot.cost_per_hour > thresholds.max_cost_per_hour {
        return step_up(current, reasons::COST_ABOVE_BUDGET);
    }

    // 5. Relaxation when both series and cost have headroom.
    if (snapshot.kept_series as f64) < 0.8 * thresholds.target_series as f64
        && snapshot.cost_per_hour < 0.8 * thresholds.max_cost_per_hour
    {
        return step_down(current, reasons::HEADROOM_AVAILABLE);
    }

    Decision::no_change(current)
}

fn step_up(current: Profile, reason: &str) -> Decision {
    let target = current.escalate();
    if target == current {
        // Already at the extreme; no tier exists in this direction.
        Decision::no_change(current)
    } else {
        Decision::step(target, reason)
    }
}

fn step_down(current: Profile, reason: &str) -> Decision {
    let target = current.deescalate();
    if target == current {
        Decision::no_change(current)
    } else {
        Decision::step(target, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> KpiSnapshot {
        KpiSnapshot {
            total_series: 8_000,
            kept_series: 4_500,
            coverage_critical: 1.0,
            cost_per_hour: 0.09,
            cpu_utilization: 1.0,
            memory_mb: 256.0,
            anomaly_count: 0,
            timestamp: Utc::now(),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            min_coverage: 0.95,
            max_cost_per_hour: 0.10,
            max_series: 10_000,
            target_series: 5_000,
            anomaly_surge_threshold: 10,
        }
    }

    #[test]
    fn test_coverage_protection_deescalates_one_tier() {
        // Scenario A
        let mut snap = snapshot();
        snap.coverage_critical = 0.80;
        let d = decide(Profile::Aggressive, &snap, &thresholds());
        assert_eq!(d.target, Profile::Balanced);
        assert_eq!(d.reason, reasons::COVERAGE_BELOW_MINIMUM);
        assert!(!d.forced);
    }

    #[test]
    fn test_cost_emergency_overrides_coverage() {
        // Scenario B: 0.25 > 2 x 0.10, so the cost emergency wins even
        // with coverage below minimum.
        let mut snap = snapshot();
        snap.cost_per_hour = 0.25;
        snap.coverage_critical = 0.50;
        let d = decide(Profile::Balanced, &snap, &thresholds());
        assert_eq!(d.target, Profile::Aggressive);
        assert_eq!(d.reason, reasons::COST_EMERGENCY);
    }

    #[test]
    fn test_relaxation_with_headroom() {
        // Scenario C
        let mut snap = snapshot();
        snap.kept_series = 3_000;
        snap.cost_per_hour = 0.03;
        let d = decide(Profile::Balanced, &snap, &thresholds());
        assert_eq!(d.target, Profile::Conservative);
        assert_eq!(d.reason, reasons::HEADROOM_AVAILABLE);
    }

    #[test]
    fn test_series_ceiling_escalates() {
        let mut snap = snapshot();
        snap.total_series = 20_000;
        snap.kept_series = 12_000;
        let d = decide(Profile::Balanced, &snap, &thresholds());
        assert_eq!(d.target, Profile::Aggressive);
        assert_eq!(d.reason, reasons::SERIES_CEILING);
    }

    #[test]
    fn test_cost_above_budget_escalates() {
        let mut snap = snapshot();
        snap.cost_per_hour = 0.15;
        let d = decide(Profile::Conservative, &snap, &thresholds());
        assert_eq!(d.target, Profile::Balanced);
        assert_eq!(d.reason, reasons::COST_ABOVE_BUDGET);
    }

    #[test]
    fn test_no_rule_matches_is_a_noop() {
        let d = decide(Profile::Balanced, &snapshot(), &thresholds());
        assert_eq!(d.target, Profile::Balanced);
        assert!(d.reason.is_empty());
    }

    #[test]
    fn test_idempotent_on_unchanged_inputs() {
        let snap = snapshot();
        let th = thresholds();
        for _ in 0..5 {
            let d = decide(Profile::Balanced, &snap, &th);
            assert_eq!(d.target, Profile::Balanced);
            assert!(d.reason.is_empty());
        }
    }

    #[test]
    fn test_escalation_saturates_at_emergency() {
        let mut snap = snapshot();
        snap.cost_per_hour = 1.0;
        let d = decide(Profile::Emergency, &snap, &thresholds());
        assert_eq!(d.target, Profile::Emergency);
        assert!(d.reason.is_empty());
    }

    #[test]
    fn test_deescalation_saturates_at_conservative() {
        let mut snap = snapshot();
        snap.kept_series = 100;
        snap.cost_per_hour = 0.01;
        let d = decide(Profile::Conservative, &snap, &thresholds());
        assert_eq!(d.target, Profile::Conservative);
        assert!(d.reason.is_empty());
    }

    #[test]
    fn test_anomaly_surge_forces_step_toward_balanced() {
        let mut snap = snapshot();
        snap.cost_per_hour = 0.50; // ladder wants to escalate
        snap.anomaly_count = 25;
        let d = decide(Profile::Aggressive, &snap, &thresholds());
        assert_eq!(d.target, Profile::Balanced);
        assert_eq!(d.reason, reasons::ANOMALY_SURGE);
        assert!(d.forced);
    }

    #[test]
    fn test_anomaly_surge_from_emergency_steps_one_tier() {
        let mut snap = snapshot();
        snap.cost_per_hour = 0.50;
        snap.anomaly_count = 25;
        let d = decide(Profile::Emergency, &snap, &thresholds());
        assert_eq!(d.target, Profile::Aggressive);
        assert!(d.forced);
    }

    #[test]
    fn test_anomaly_surge_suppresses_escalation_from_balanced() {
        let mut snap = snapshot();
        snap.cost_per_hour = 0.50; // ladder target would be aggressive
        snap.anomaly_count = 25;
        let d = decide(Profile::Balanced, &snap, &thresholds());
        assert_eq!(d.target, Profile::Balanced);
        assert!(d.reason.is_empty());
        assert!(!d.forced);
    }

    #[test]
    fn test_single_tier_invariant_over_input_grid() {
        let th = thresholds();
        let costs = [0.0, 0.05, 0.11, 0.25, 5.0];
        let coverages = [0.0, 0.5, 0.94, 0.95, 1.0];
        let kept = [0u64, 3_000, 5_000, 11_000, 50_000];
        let anomalies = [0u64, 10, 11, 100];

        for profile in Profile::LADDER {
            for &cost in &costs {
                for &coverage in &coverages {
                    for &k in &kept {
                        for &a in &anomalies {
                            let snap = KpiSnapshot::normalized(
                                k.max(1) * 2,
                                k,
                                coverage,
                                cost,
                                0.5,
                                128.0,
                                a,
                                Utc::now(),
                            );
                            let d = decide(profile, &snap, &th);
                            let delta = d.target.ordinal() as i64 - profile.ordinal() as i64;
                            assert!(
                                delta.abs() <= 1,
                                "{profile} -> {} jumped {delta} tiers",
                                d.target
                            );
                        }
                    }
                }
            }
        }
    }
}
