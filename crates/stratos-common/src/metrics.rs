//! Observability trait.
//!
//! Core crates never talk to Prometheus directly -- they hold an
//! `Arc<dyn Metrics>` and call `inc`/`set`/`observe`. The binary crate wires
//! up [`PrometheusMetrics`] (or a test double) and hands it down.

use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};

/// Thin observability seam the core calls through.
pub trait Metrics: Send + Sync {
    /// Increment a counter by `v`.
    fn inc(&self, name: &str, labels: &[(&str, &str)], v: u64);
    /// Set a gauge to `v`.
    fn set(&self, name: &str, labels: &[(&str, &str)], v: f64);
    /// Record an observation into a histogram.
    fn observe(&self, name: &str, labels: &[(&str, &str)], v: f64);
}

/// A `Metrics` implementation that discards everything. Used by tests and as
/// the coordinator/consensus default when no registry is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn inc(&self, _name: &str, _labels: &[(&str, &str)], _v: u64) {}
    fn set(&self, _name: &str, _labels: &[(&str, &str)], _v: f64) {}
    fn observe(&self, _name: &str, _labels: &[(&str, &str)], _v: f64) {}
}

/// Default `Metrics` implementation, backed by the `metrics`/
/// `metrics-exporter-prometheus` facade plus the `prometheus` crate for text
/// export. Registration of the actual HTTP endpoint is the binary crate's
/// job.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Render the process's metrics in Prometheus text exposition format.
    #[must_use]
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("failed to encode prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn labels_to_metrics_vec(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

impl Metrics for PrometheusMetrics {
    fn inc(&self, name: &str, labels: &[(&str, &str)], v: u64) {
        let owned = labels_to_metrics_vec(labels);
        metrics::counter!(name.to_string(), &owned).increment(v);
    }

    fn set(&self, name: &str, labels: &[(&str, &str)], v: f64) {
        let owned = labels_to_metrics_vec(labels);
        metrics::gauge!(name.to_string(), &owned).set(v);
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], v: f64) {
        let owned = labels_to_metrics_vec(labels);
        metrics::histogram!(name.to_string(), &owned).record(v);
    }
}
