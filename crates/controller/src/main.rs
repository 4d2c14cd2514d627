//! Adaptive profile controller
//!
//! Long-running control loop that keeps a metrics collector inside
//! its cost/coverage budget by switching between named optimization
//! profiles. One instance per collector, enforced by a lock file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use controller_lib::{
    health::components, ApplierConfig, CommandProcess, ConfigApplier, ControllerMetrics,
    GuardConfig, HealthRegistry, HttpMetricSource, HysteresisGuard, InstanceLock, Notifier,
    NotifierConfig, Profile, ProcessConfig, ScrapeAdapter, Scheduler, SchedulerConfig, StateStore,
    StructuredLogger, TransitionLog,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::ControllerConfig::load()?;
    info!(host = %config.host, "Controller configured");

    // Single-instance lock: a held lock is fatal so a supervisor can
    // decide what to do.
    let _instance_lock = InstanceLock::acquire(&config.lock_path)
        .context("Failed to acquire single-instance lock")?;

    // Durable state; corruption here is also fatal by design.
    let store = StateStore::open(&config.state_path, Profile::Balanced)
        .context("Failed to open state store")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::METRIC_SOURCE).await;
    health_registry.register(components::CONFIG_APPLIER).await;
    health_registry.register(components::STATE_STORE).await;
    health_registry.register(components::NOTIFIER).await;

    let metrics = ControllerMetrics::new();

    let logger = StructuredLogger::new(config.host.clone());
    logger.log_startup(CONTROLLER_VERSION, store.current_profile());

    let source = HttpMetricSource::new(
        config.scrape_endpoint.clone(),
        Duration::from_secs(config.scrape_timeout_secs),
    )?;
    let adapter = ScrapeAdapter::new(Box::new(source), config.max_scrape_failures);

    let guard = HysteresisGuard::new(GuardConfig {
        min_dwell: chrono::Duration::seconds(config.min_dwell_secs as i64),
        thrash_window: chrono::Duration::seconds(config.thrash_window_secs as i64),
        max_changes_in_window: config.max_changes_in_window,
        cooldown: chrono::Duration::seconds(config.cooldown_secs as i64),
    });

    let process = Arc::new(CommandProcess::new(ProcessConfig {
        reload_command: config.reload_command.clone(),
        restart_command: config.restart_command.clone(),
        health_url: config.collector_health_url.clone(),
        health_command: None,
        command_timeout: Duration::from_secs(30),
    })?);

    let applier = ConfigApplier::new(
        ApplierConfig {
            config_path: PathBuf::from(&config.collector_config_path),
            backup_dir: PathBuf::from(&config.backup_dir),
            reload_attempts: 3,
            reload_backoff: Duration::from_secs(2),
            updated_by: format!("profile-controller@{}", config.host),
        },
        process,
    );

    let notifier = Notifier::new(NotifierConfig {
        webhook_url: config.webhook_url.clone(),
        git_dir: config.git_dir.clone().map(PathBuf::from),
    });

    let translog = TransitionLog::new(&config.transition_log_path);

    let (scheduler, status_rx) = Scheduler::new(
        SchedulerConfig {
            check_interval: Duration::from_secs(config.check_interval_secs),
            host: config.host.clone(),
        },
        config.thresholds.clone(),
        adapter,
        guard,
        applier,
        notifier,
        store,
        translog,
        health_registry.clone(),
        metrics,
    );

    health_registry.set_ready(true).await;

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), status_rx));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(scheduler.run(shutdown_rx));

    shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    loop_handle
        .await
        .context("Control loop task panicked")??;
    api_handle.abort();

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
