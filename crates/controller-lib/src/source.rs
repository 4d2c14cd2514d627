//! Metric source adapter
//!
//! Pulls named numeric KPIs from the collector's scrape endpoint.
//! Failure handling is per-metric: a missing or unparsable value is
//! replaced with its caller-supplied default, and only a run of
//! consecutive whole-endpoint failures becomes a hard error that
//! skips the loop iteration.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::models::KpiSnapshot;

/// Well-known KPI metric names on the scrape endpoint.
pub mod metric_names {
    pub const TOTAL_SERIES: &str = "pipeline_total_series";
    pub const KEPT_SERIES: &str = "pipeline_kept_series";
    pub const COVERAGE_CRITICAL: &str = "pipeline_coverage_critical";
    pub const COST_PER_HOUR: &str = "pipeline_estimated_cost_per_hour";
    pub const CPU_UTILIZATION: &str = "process_cpu_utilization";
    pub const MEMORY_MB: &str = "process_memory_mb";
    pub const ANOMALY_COUNT: &str = "pipeline_anomaly_count";
}

/// A requested metric with its safe fallback value.
#[derive(Debug, Clone)]
pub struct MetricRequest {
    pub name: String,
    pub default: f64,
}

impl MetricRequest {
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// The full KPI request set. Coverage defaults to 1.0 ("assume
/// healthy") so a blind controller never triggers a false coverage
/// alarm; everything else defaults to zero.
pub fn kpi_requests() -> Vec<MetricRequest> {
    vec![
        MetricRequest::new(metric_names::TOTAL_SERIES, 0.0),
        MetricRequest::new(metric_names::KEPT_SERIES, 0.0),
        MetricRequest::new(metric_names::COVERAGE_CRITICAL, 1.0),
        MetricRequest::new(metric_names::COST_PER_HOUR, 0.0),
        MetricRequest::new(metric_names::CPU_UTILIZATION, 0.0),
        MetricRequest::new(metric_names::MEMORY_MB, 0.0),
        MetricRequest::new(metric_names::ANOMALY_COUNT, 0.0),
    ]
}

/// Trait for scrape endpoint implementations
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Fetch the raw text exposition payload.
    async fn scrape(&self) -> Result<String>;
}

/// HTTP scrape source with a bounded request timeout.
pub struct HttpMetricSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetricSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build scrape HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn scrape(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("Scrape request to {} failed", self.endpoint))?
            .error_for_status()
            .context("Scrape endpoint returned error status")?;
        response.text().await.context("Failed to read scrape body")
    }
}

/// Parse a text-line `name value` exposition payload.
///
/// Tolerant of format drift: comment lines, label sets (`name{...}`)
/// and junk lines are skipped rather than failing the whole payload.
pub fn parse_exposition(payload: &str) -> HashMap<String, f64> {
    let mut values = HashMap::new();
    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(name_part), Some(value_part)) = (parts.next(), parts.next()) else {
            continue;
        };
        // Strip a label set if present: name{label="x"} value
        let name = name_part.split('{').next().unwrap_or(name_part);
        match value_part.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                values.insert(name.to_string(), v);
            }
            _ => {
                debug!(line = %line, "Skipping unparsable metric line");
            }
        }
    }
    values
}

/// Adapter wrapping a [`MetricSource`] with per-metric defaulting and
/// consecutive-failure tracking.
pub struct ScrapeAdapter {
    source: Box<dyn MetricSource>,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
}

impl ScrapeAdapter {
    pub fn new(source: Box<dyn MetricSource>, max_consecutive_failures: u32) -> Self {
        Self {
            source,
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: 0,
        }
    }

    /// Fetch the requested metrics, substituting each metric's default
    /// when it is missing from the payload. Returns
    /// [`SourceError::EndpointUnreachable`] only once the endpoint has
    /// failed the configured number of consecutive attempts.
    pub async fn fetch(
        &mut self,
        requests: &[MetricRequest],
    ) -> Result<HashMap<String, f64>, SourceError> {
        let payload = match self.source.scrape().await {
            Ok(payload) => {
                self.consecutive_failures = 0;
                Some(payload)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_consecutive_failures {
                    let err = SourceError::EndpointUnreachable {
                        attempts: self.consecutive_failures,
                        last_error: e.to_string(),
                    };
                    self.consecutive_failures = 0;
                    return Err(err);
                }
                warn!(
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    "Scrape failed, substituting defaults for all metrics"
                );
                None
            }
        };

        let parsed = payload.as_deref().map(parse_exposition).unwrap_or_default();

        let mut out = HashMap::with_capacity(requests.len());
        for request in requests {
            match parsed.get(&request.name) {
                Some(v) => {
                    out.insert(request.name.clone(), *v);
                }
                None => {
                    if payload.is_some() {
                        debug!(
                            metric = %request.name,
                            default = request.default,
                            "Metric missing from payload, using default"
                        );
                    }
                    out.insert(request.name.clone(), request.default);
                }
            }
        }
        Ok(out)
    }
}

/// Build a normalized KPI snapshot from fetched metric values.
pub fn snapshot_from_metrics(values: &HashMap<String, f64>) -> KpiSnapshot {
    let get = |name: &str, default: f64| values.get(name).copied().unwrap_or(default);

    KpiSnapshot::normalized(
        get(metric_names::TOTAL_SERIES, 0.0).max(0.0) as u64,
        get(metric_names::KEPT_SERIES, 0.0).max(0.0) as u64,
        get(metric_names::COVERAGE_CRITICAL, 1.0),
        get(metric_names::COST_PER_HOUR, 0.0),
        get(metric_names::CPU_UTILIZATION, 0.0),
        get(metric_names::MEMORY_MB, 0.0),
        get(metric_names::ANOMALY_COUNT, 0.0).max(0.0) as u64,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticSource(String);

    #[async_trait]
    impl MetricSource for StaticSource {
        async fn scrape(&self) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetricSource for FailingSource {
        async fn scrape(&self) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_parse_plain_name_value_lines() {
        let payload = "pipeline_total_series 12000\npipeline_kept_series 8000\n";
        let values = parse_exposition(payload);
        assert_eq!(values["pipeline_total_series"], 12000.0);
        assert_eq!(values["pipeline_kept_series"], 8000.0);
    }

    #[test]
    fn test_parse_tolerates_comments_labels_and_junk() {
        let payload = "\
# HELP pipeline_total_series Total series seen
# TYPE pipeline_total_series gauge
pipeline_total_series{instance=\"collector-0\"} 500
not a metric line at all
pipeline_kept_series notanumber
pipeline_coverage_critical 0.97
";
        let values = parse_exposition(payload);
        assert_eq!(values["pipeline_total_series"], 500.0);
        assert_eq!(values["pipeline_coverage_critical"], 0.97);
        assert!(!values.contains_key("pipeline_kept_series"));
    }

    #[tokio::test]
    async fn test_fetch_substitutes_default_per_missing_metric() {
        let payload = "pipeline_total_series 100\n".to_string();
        let mut adapter = ScrapeAdapter::new(Box::new(StaticSource(payload)), 3);

        let values = adapter.fetch(&kpi_requests()).await.unwrap();
        assert_eq!(values[metric_names::TOTAL_SERIES], 100.0);
        // Missing coverage defaults to "assume healthy".
        assert_eq!(values[metric_names::COVERAGE_CRITICAL], 1.0);
        assert_eq!(values[metric_names::COST_PER_HOUR], 0.0);
    }

    #[tokio::test]
    async fn test_fetch_degrades_to_defaults_before_failure_bound() {
        let mut adapter = ScrapeAdapter::new(
            Box::new(FailingSource {
                calls: AtomicU32::new(0),
            }),
            3,
        );

        // First two failures degrade to defaults.
        for _ in 0..2 {
            let values = adapter.fetch(&kpi_requests()).await.unwrap();
            assert_eq!(values[metric_names::COVERAGE_CRITICAL], 1.0);
        }

        // Third consecutive failure is a hard error.
        let err = adapter.fetch(&kpi_requests()).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::EndpointUnreachable { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        struct FlakySource {
            calls: AtomicU32,
        }

        #[async_trait]
        impl MetricSource for FlakySource {
            async fn scrape(&self) -> Result<String> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 2 {
                    Ok("pipeline_total_series 1\n".to_string())
                } else {
                    anyhow::bail!("timeout")
                }
            }
        }

        let mut adapter = ScrapeAdapter::new(
            Box::new(FlakySource {
                calls: AtomicU32::new(0),
            }),
            3,
        );

        adapter.fetch(&kpi_requests()).await.unwrap(); // fail 1
        adapter.fetch(&kpi_requests()).await.unwrap(); // fail 2
        adapter.fetch(&kpi_requests()).await.unwrap(); // success resets
        adapter.fetch(&kpi_requests()).await.unwrap(); // fail 1 again
        let result = adapter.fetch(&kpi_requests()).await; // fail 2, still soft
        assert!(result.is_ok());
    }

    #[test]
    fn test_snapshot_from_metrics_enforces_invariants() {
        let mut values = HashMap::new();
        values.insert(metric_names::TOTAL_SERIES.to_string(), 1000.0);
        values.insert(metric_names::KEPT_SERIES.to_string(), 2500.0);
        values.insert(metric_names::COVERAGE_CRITICAL.to_string(), 1.4);

        let snap = snapshot_from_metrics(&values);
        assert_eq!(snap.total_series, 1000);
        assert_eq!(snap.kept_series, 1000);
        assert_eq!(snap.coverage_critical, 1.0);
    }
}
