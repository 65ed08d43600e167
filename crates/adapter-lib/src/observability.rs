//! Observability infrastructure for the metrics adapter
//!
//! Provides:
//! - Prometheus metrics (backend query latency, discovery cycles, registered metrics)
//! - Structured JSON logging with tracing

use prometheus::{
    exponential_buckets, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for discovery cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdapterMetricsInner> = OnceLock::new();

struct AdapterMetricsInner {
    query_latency_seconds: HistogramVec,
    discovery_cycle_seconds: Histogram,
    discovery_failures: IntCounter,
    registered_metrics: IntGauge,
    namespace_failures: IntCounterVec,
}

impl AdapterMetricsInner {
    fn new() -> Self {
        Self {
            query_latency_seconds: register_histogram_vec!(
                "cmgateway_prometheus_query_latency_seconds",
                "Prometheus client query latency in seconds. Broken down by target prometheus endpoint and target server",
                &["endpoint", "server"],
                exponential_buckets(0.0001, 2.0, 10).unwrap_or_default()
            )
            .expect("Failed to register query_latency_seconds"),

            discovery_cycle_seconds: register_histogram!(
                "metrics_adapter_discovery_cycle_seconds",
                "Time spent listing series and rebuilding the metric registry",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register discovery_cycle_seconds"),

            discovery_failures: register_int_counter!(
                "metrics_adapter_discovery_failures_total",
                "Number of discovery cycles aborted because a series query failed"
            )
            .expect("Failed to register discovery_failures"),

            registered_metrics: register_int_gauge!(
                "metrics_adapter_registered_metrics",
                "Number of custom metrics currently served"
            )
            .expect("Failed to register registered_metrics"),

            namespace_failures: register_int_counter_vec!(
                "metrics_adapter_resource_namespace_failures_total",
                "Number of namespaces skipped while answering container metrics requests",
                &["namespace"]
            )
            .expect("Failed to register namespace_failures"),
        }
    }
}

/// Adapter metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AdapterMetrics {
    _private: (),
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdapterMetricsInner {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new)
    }

    /// Record the latency of one backend API call
    pub fn observe_query_latency(&self, endpoint: &str, server: &str, duration_secs: f64) {
        self.inner()
            .query_latency_seconds
            .with_label_values(&[endpoint, server])
            .observe(duration_secs);
    }

    pub fn observe_discovery_cycle(&self, duration_secs: f64) {
        self.inner().discovery_cycle_seconds.observe(duration_secs);
    }

    pub fn inc_discovery_failures(&self) {
        self.inner().discovery_failures.inc();
    }

    pub fn set_registered_metrics(&self, count: usize) {
        self.inner().registered_metrics.set(count as i64);
    }

    pub fn inc_namespace_failures(&self, namespace: &str) {
        self.inner()
            .namespace_failures
            .with_label_values(&[namespace])
            .inc();
    }
}

/// Structured logger for adapter lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    server: String,
}

impl StructuredLogger {
    /// `server` is the backend the adapter serves metrics from
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    pub fn log_startup(&self, version: &str, rules: usize, resource_metrics: bool) {
        info!(
            event = "adapter_started",
            server = %self.server,
            adapter_version = %version,
            rules = rules,
            resource_metrics = resource_metrics,
            "Metrics adapter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "adapter_shutdown",
            server = %self.server,
            reason = %reason,
            "Metrics adapter shutting down"
        );
    }

    pub fn log_discovery_cycle(&self, selectors: usize, metrics: usize, duration_secs: f64) {
        info!(
            event = "discovery_cycle",
            server = %self.server,
            selectors = selectors,
            metrics = metrics,
            duration_secs = duration_secs,
            "Refreshed available metrics"
        );
    }

    pub fn log_discovery_failure(&self, error: &str) {
        warn!(
            event = "discovery_failed",
            server = %self.server,
            error = %error,
            "Unable to refresh available metrics, keeping previous set"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_metrics_creation() {
        let metrics = AdapterMetrics::new();

        metrics.observe_query_latency("/api/v1/query", "http://prometheus:9090", 0.002);
        metrics.observe_discovery_cycle(0.5);
        metrics.inc_discovery_failures();
        metrics.set_registered_metrics(12);
        metrics.inc_namespace_failures("default");

        // handles share one registration
        let _again = AdapterMetrics::default();
        metrics.set_registered_metrics(3);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("http://prometheus:9090");
        assert_eq!(logger.server, "http://prometheus:9090");
    }
}
