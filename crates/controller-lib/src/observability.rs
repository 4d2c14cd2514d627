//! Observability for the controller itself
//!
//! Prometheus metrics (decision counts, transitions by reason, scrape
//! latency, reload failures) and structured JSON event logging via
//! tracing.

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{KpiSnapshot, Profile};

/// Histogram buckets for scrape/apply latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    decisions_total: IntCounter,
    transitions_total: IntCounterVec,
    iterations_skipped_total: IntCounter,
    thrash_cooldowns_total: IntCounter,
    reload_failures_total: IntCounter,
    fallback_restarts_total: IntCounter,
    apply_failures_total: IntCounter,
    scrape_latency_seconds: Histogram,
    apply_latency_seconds: Histogram,
    current_profile_ordinal: IntGauge,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            decisions_total: register_int_counter!(
                "profile_controller_decisions_total",
                "Decision engine evaluations performed"
            )
            .expect("Failed to register decisions_total"),

            transitions_total: register_int_counter_vec!(
                "profile_controller_transitions_total",
                "Applied profile transitions by reason",
                &["reason"]
            )
            .expect("Failed to register transitions_total"),

            iterations_skipped_total: register_int_counter!(
                "profile_controller_iterations_skipped_total",
                "Loop iterations skipped because the scrape endpoint was unreachable"
            )
            .expect("Failed to register iterations_skipped_total"),

            thrash_cooldowns_total: register_int_counter!(
                "profile_controller_thrash_cooldowns_total",
                "Cooldowns entered after thrash detection"
            )
            .expect("Failed to register thrash_cooldowns_total"),

            reload_failures_total: register_int_counter!(
                "profile_controller_reload_failures_total",
                "Collector reload attempts that failed"
            )
            .expect("Failed to register reload_failures_total"),

            fallback_restarts_total: register_int_counter!(
                "profile_controller_fallback_restarts_total",
                "Collector restarts after reload exhausted retries"
            )
            .expect("Failed to register fallback_restarts_total"),

            apply_failures_total: register_int_counter!(
                "profile_controller_apply_failures_total",
                "Apply attempts abandoned with the old profile kept"
            )
            .expect("Failed to register apply_failures_total"),

            scrape_latency_seconds: register_histogram!(
                "profile_controller_scrape_latency_seconds",
                "Time spent fetching KPIs from the scrape endpoint",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scrape_latency_seconds"),

            apply_latency_seconds: register_histogram!(
                "profile_controller_apply_latency_seconds",
                "End-to-end time of one config apply attempt",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register apply_latency_seconds"),

            current_profile_ordinal: register_int_gauge!(
                "profile_controller_current_profile_ordinal",
                "Ordinal of the active profile (0=conservative, 3=emergency)"
            )
            .expect("Failed to register current_profile_ordinal"),
        }
    }
}

/// Lightweight handle to the global controller metrics.
#[derive(Clone, Default)]
pub struct ControllerMetrics {
    _private: (),
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_decisions(&self) {
        self.inner().decisions_total.inc();
    }

    pub fn inc_transition(&self, reason: &str) {
        self.inner()
            .transitions_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_iterations_skipped(&self) {
        self.inner().iterations_skipped_total.inc();
    }

    pub fn inc_thrash_cooldowns(&self) {
        self.inner().thrash_cooldowns_total.inc();
    }

    pub fn inc_reload_failures(&self) {
        self.inner().reload_failures_total.inc();
    }

    pub fn inc_fallback_restarts(&self) {
        self.inner().fallback_restarts_total.inc();
    }

    pub fn inc_apply_failures(&self) {
        self.inner().apply_failures_total.inc();
    }

    pub fn observe_scrape_latency(&self, duration_secs: f64) {
        self.inner().scrape_latency_seconds.observe(duration_secs);
    }

    pub fn observe_apply_latency(&self, duration_secs: f64) {
        self.inner().apply_latency_seconds.observe(duration_secs);
    }

    pub fn set_current_profile(&self, profile: Profile) {
        self.inner()
            .current_profile_ordinal
            .set(profile.ordinal() as i64);
    }
}

/// Structured event logger, one instance per controller.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, profile: Profile) {
        info!(
            event = "controller_started",
            host = %self.host,
            version = %version,
            profile = %profile,
            "Profile controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            host = %self.host,
            reason = %reason,
            "Profile controller shutting down"
        );
    }

    pub fn log_transition(&self, from: Profile, to: Profile, reason: &str, restarted: bool) {
        info!(
            event = "profile_transition",
            host = %self.host,
            from = %from,
            to = %to,
            reason = %reason,
            restarted = restarted,
            "Profile transition applied"
        );
    }

    pub fn log_apply_failure(&self, current: Profile, attempted: Profile, error: &str) {
        warn!(
            event = "apply_failure",
            host = %self.host,
            current = %current,
            attempted = %attempted,
            error = %error,
            "Apply attempt abandoned, old profile stays authoritative"
        );
    }

    pub fn log_cooldown(&self, reason: &str, cooldown_secs: i64) {
        warn!(
            event = "thrash_cooldown",
            host = %self.host,
            reason = %reason,
            cooldown_secs = cooldown_secs,
            "Thrashing detected, entering cooldown"
        );
    }

    pub fn log_iteration_skipped(&self, error: &str) {
        warn!(
            event = "iteration_skipped",
            host = %self.host,
            error = %error,
            "Scrape endpoint unreachable, skipping iteration"
        );
    }

    pub fn log_state_dump(&self, profile: Profile, restart_count: u64, transitions: usize) {
        info!(
            event = "state_dump",
            host = %self.host,
            profile = %profile,
            restart_count = restart_count,
            recent_transitions = transitions,
            "Controller state"
        );
    }

    pub fn log_snapshot(&self, snapshot: &KpiSnapshot) {
        info!(
            event = "kpi_snapshot",
            host = %self.host,
            total_series = snapshot.total_series,
            kept_series = snapshot.kept_series,
            coverage_critical = snapshot.coverage_critical,
            cost_per_hour = snapshot.cost_per_hour,
            anomaly_count = snapshot.anomaly_count,
            "Sampled pipeline KPIs"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_can_record() {
        let metrics = ControllerMetrics::new();
        metrics.inc_decisions();
        metrics.inc_transition("cost above budget");
        metrics.observe_scrape_latency(0.05);
        metrics.set_current_profile(Profile::Aggressive);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("node-1");
        assert_eq!(logger.host, "node-1");
    }
}
