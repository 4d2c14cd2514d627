//! Control loop scheduler
//!
//! Owns the timing loop and the only mutable path through the
//! controller: scrape -> decide -> guard -> apply -> notify. Also
//! handles the single-instance lock, signal-driven forced checks,
//! state dumps, and graceful shutdown.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::applier::{ApplyMethod, ConfigApplier};
use crate::decision::decide;
use crate::error::ApplyError;
use crate::health::{components, HealthRegistry};
use crate::hysteresis::{HysteresisGuard, Verdict};
use crate::models::{Profile, Thresholds, TransitionRecord};
use crate::notify::{ApplyFailureEvent, Notifier};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::source::{kpi_requests, snapshot_from_metrics, ScrapeAdapter};
use crate::store::StateStore;
use crate::translog::TransitionLog;

/// Exclusive lock guaranteeing at most one controller instance
/// mutates the state store and config. The lock file is removed on
/// clean shutdown.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock or fail immediately; a held lock is fatal at
    /// startup so a second instance never runs.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create lock directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Cannot open instance lock {}", path.display()))?;
        file.try_lock_exclusive().with_context(|| {
            format!(
                "Another controller instance holds the lock at {}",
                path.display()
            )
        })?;
        Ok(Self { file, path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Read-only view of controller state published to the API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub current_profile: Profile,
    pub last_change: chrono::DateTime<Utc>,
    pub restart_count: u64,
    pub recent_transitions: Vec<TransitionRecord>,
}

impl StatusSnapshot {
    fn from_store(store: &StateStore) -> Self {
        let state = store.state();
        Self {
            current_profile: state.current_profile,
            last_change: state.last_change,
            restart_count: state.restart_count,
            recent_transitions: state.transitions.iter().rev().take(10).cloned().collect(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Normal loop interval (default 30s)
    pub check_interval: Duration,
    /// Host recorded in transition records
    pub host: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// What one iteration did, which drives the next sleep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Normal iteration, whether or not a transition applied.
    Completed { applied: bool },
    /// Scrape endpoint unreachable; nothing decided, nothing mutated.
    Skipped,
    /// Thrashing detected; sleep the cooldown instead of the interval.
    Cooldown(Duration),
}

/// The control loop. Everything funnels through this single task.
pub struct Scheduler {
    config: SchedulerConfig,
    thresholds: Thresholds,
    adapter: ScrapeAdapter,
    guard: HysteresisGuard,
    applier: ConfigApplier,
    notifier: Notifier,
    store: StateStore,
    translog: TransitionLog,
    health: HealthRegistry,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        thresholds: Thresholds,
        adapter: ScrapeAdapter,
        guard: HysteresisGuard,
        applier: ConfigApplier,
        notifier: Notifier,
        store: StateStore,
        translog: TransitionLog,
        health: HealthRegistry,
        metrics: ControllerMetrics,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let logger = StructuredLogger::new(config.host.clone());
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::from_store(&store));
        metrics.set_current_profile(store.current_profile());

        let scheduler = Self {
            config,
            thresholds,
            adapter,
            guard,
            applier,
            notifier,
            store,
            translog,
            health,
            metrics,
            logger,
            status_tx,
        };
        (scheduler, status_rx)
    }

    /// Run until shutdown. Signals: SIGUSR1 forces an immediate
    /// re-evaluation, SIGUSR2 dumps current state to the log.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> Result<()> {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            profile = %self.store.current_profile(),
            "Starting control loop"
        );

        #[cfg(unix)]
        let (mut force_check, mut dump_state) = {
            use tokio::signal::unix::{signal, SignalKind};
            (
                signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?,
                signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?,
            )
        };

        let mut next_sleep = self.config.check_interval;

        loop {
            let deadline = Instant::now() + next_sleep;
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = force_check.recv() => {
                        info!(event = "forced_check", "Forced re-evaluation requested");
                    }
                    _ = dump_state.recv() => {
                        self.dump_state();
                        continue;
                    }
                    _ = shutdown.recv() => break,
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown.recv() => break,
                }
            }

            next_sleep = match self.run_iteration().await {
                IterationOutcome::Cooldown(cooldown) => cooldown,
                _ => self.config.check_interval,
            };
        }

        self.logger.log_shutdown("shutdown signal received");
        Ok(())
    }

    /// One full pass of the control loop.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        // Sample KPIs; an unreachable endpoint skips the whole
        // iteration with no decision and no state mutation.
        let scrape_start = Instant::now();
        let values = match self.adapter.fetch(&kpi_requests()).await {
            Ok(values) => {
                self.health.set_healthy(components::METRIC_SOURCE).await;
                values
            }
            Err(e) => {
                self.metrics.inc_iterations_skipped();
                self.logger.log_iteration_skipped(&e.to_string());
                self.health
                    .set_degraded(components::METRIC_SOURCE, e.to_string())
                    .await;
                return IterationOutcome::Skipped;
            }
        };
        self.metrics
            .observe_scrape_latency(scrape_start.elapsed().as_secs_f64());

        let snapshot = snapshot_from_metrics(&values);
        self.logger.log_snapshot(&snapshot);

        let current = self.store.current_profile();
        self.metrics.inc_decisions();
        let decision = decide(current, &snapshot, &self.thresholds);

        if !decision.is_change(current) {
            debug!(profile = %current, "No profile change needed");
            return IterationOutcome::Completed { applied: false };
        }

        match self
            .guard
            .allow(decision.target, decision.forced, self.store.state(), Utc::now())
        {
            Verdict::Allow => {}
            Verdict::Reject { reason } => {
                debug!(
                    proposed = %decision.target,
                    reason = %reason,
                    "Transition blocked by hysteresis guard"
                );
                return IterationOutcome::Completed { applied: false };
            }
            Verdict::Cooldown { reason } => {
                self.metrics.inc_thrash_cooldowns();
                let cooldown = Duration::from_secs(self.guard.cooldown().num_seconds() as u64);
                self.logger.log_cooldown(&reason, cooldown.as_secs() as i64);
                return IterationOutcome::Cooldown(cooldown);
            }
        }

        let apply_start = Instant::now();
        let result = self
            .applier
            .apply(
                &mut self.store,
                &self.translog,
                decision.target,
                &decision.reason,
                &self.config.host,
            )
            .await;
        self.metrics
            .observe_apply_latency(apply_start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                let restarted = outcome.method == ApplyMethod::Restarted;
                if restarted {
                    self.metrics.inc_fallback_restarts();
                }
                self.metrics.inc_transition(&decision.reason);
                self.metrics.set_current_profile(decision.target);
                self.logger
                    .log_transition(current, decision.target, &decision.reason, restarted);
                self.health.set_healthy(components::CONFIG_APPLIER).await;
                self.publish_status();
                self.notifier.notify_transition(&outcome.record).await;
                IterationOutcome::Completed { applied: true }
            }
            Err(e) => {
                self.handle_apply_failure(current, decision.target, e).await;
                IterationOutcome::Completed { applied: false }
            }
        }
    }

    async fn handle_apply_failure(&mut self, current: Profile, attempted: Profile, e: ApplyError) {
        match &e {
            ApplyError::LockContention(_) => {
                // Manual edit in flight; defer to the next iteration.
                warn!(error = %e, "Config lock contended, deferring apply");
            }
            ApplyError::RestartFailure(_) => {
                self.metrics.inc_reload_failures();
                self.metrics.inc_apply_failures();
                self.logger
                    .log_apply_failure(current, attempted, &e.to_string());
                self.health
                    .set_unhealthy(components::CONFIG_APPLIER, e.to_string())
                    .await;
                self.notifier
                    .notify_failure(&ApplyFailureEvent {
                        timestamp: Utc::now(),
                        current_profile: current,
                        attempted_profile: attempted,
                        error: e.to_string(),
                        host: self.config.host.clone(),
                    })
                    .await;
            }
            _ => {
                self.metrics.inc_apply_failures();
                self.logger
                    .log_apply_failure(current, attempted, &e.to_string());
                self.health
                    .set_degraded(components::CONFIG_APPLIER, e.to_string())
                    .await;
            }
        }
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send(StatusSnapshot::from_store(&self.store));
    }

    fn dump_state(&self) {
        let state = self.store.state();
        self.logger.log_state_dump(
            state.current_profile,
            state.restart_count,
            state.transitions.len(),
        );
    }

    /// Host recorded on transitions; exposed for startup logging.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn current_profile(&self) -> Profile {
        self.store.current_profile()
    }
}
