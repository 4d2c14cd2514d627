//! Adaptive profile controller library
//!
//! Operates a metrics-collection pipeline under a cost/coverage
//! budget by switching between named optimization profiles. This
//! crate provides:
//! - KPI sampling from the collector's scrape endpoint
//! - A pure priority-ladder decision engine
//! - Hysteresis and thrash suppression
//! - Atomic configuration apply with reload/restart fallback
//! - Durable state, transition audit log, and notifications
//! - The single-instance control loop

pub mod applier;
pub mod decision;
pub mod error;
pub mod health;
pub mod hysteresis;
pub mod models;
pub mod notify;
pub mod observability;
pub mod process;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod translog;

pub use applier::{ApplierConfig, ApplyMethod, ApplyOutcome, ConfigApplier, ConfigDocument};
pub use decision::{decide, Decision};
pub use error::{ApplyError, SourceError, StoreError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use hysteresis::{GuardConfig, HysteresisGuard, Verdict};
pub use models::{ControllerState, KpiSnapshot, Profile, Thresholds, TransitionRecord};
pub use notify::{Notifier, NotifierConfig};
pub use observability::{ControllerMetrics, StructuredLogger};
pub use process::{CommandProcess, ManagedProcess, ProcessConfig};
pub use scheduler::{InstanceLock, IterationOutcome, Scheduler, SchedulerConfig, StatusSnapshot};
pub use source::{HttpMetricSource, MetricSource, ScrapeAdapter};
pub use store::StateStore;
pub use translog::TransitionLog;
