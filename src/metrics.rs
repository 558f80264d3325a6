//! Batch instrumentation computed while encoding produce requests.
//!
//! The codec never touches global state: it reports observations to a
//! [`MetricsSink`] handed to it by the caller. [`PrometheusMetrics`] keeps its
//! collectors in a registry it owns, so several producers can coexist in one
//! process and the host decides how the registry is exposed.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder, opts,
};
use tracing::warn;

use crate::error::{Error, Result};

/// Receiver of per-topic observations made while encoding a request.
pub trait MetricsSink: Send + Sync {
    /// Encoded size in bytes of one partition's entry in a request.
    fn observe_batch_size(&self, topic: &str, bytes: usize);

    /// Uncompressed value length divided by compressed size, per wrapper message.
    fn observe_compression_ratio(&self, topic: &str, ratio: f64);

    /// Records written for the topic by one request.
    fn add_records_sent(&self, topic: &str, records: u64);

    /// Same count as [`MetricsSink::add_records_sent`], as a distribution.
    fn observe_records_per_request(&self, topic: &str, records: u64);
}

/// Sink that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_batch_size(&self, _topic: &str, _bytes: usize) {}
    fn observe_compression_ratio(&self, _topic: &str, _ratio: f64) {}
    fn add_records_sent(&self, _topic: &str, _records: u64) {}
    fn observe_records_per_request(&self, _topic: &str, _records: u64) {}
}

// =============================================================================
// Prometheus sink
// =============================================================================

const BATCH_SIZE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0,
];
const COMPRESSION_RATIO_BUCKETS: &[f64] = &[1.0, 1.5, 2.0, 3.0, 5.0, 10.0, 20.0];
const RECORDS_PER_REQUEST_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0];

/// [`MetricsSink`] backed by a dedicated Prometheus registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    batch_size: HistogramVec,
    compression_ratio: HistogramVec,
    records_sent: IntCounterVec,
    records_per_request: HistogramVec,
}

impl PrometheusMetrics {
    /// Create the collectors in a fresh registry whose metric names carry `prefix`.
    pub fn new(prefix: &str) -> Result<Self> {
        let registry = Registry::new_custom(Some(prefix.to_string()), None)
            .map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;
        Self::with_registry(registry)
    }

    /// Register the collectors into a registry owned by the host application.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let batch_size = register_histogram_vec_safe(
            &registry,
            "batch_size_bytes",
            "Encoded bytes per partition batch in a produce request",
            BATCH_SIZE_BUCKETS,
        )?;
        let compression_ratio = register_histogram_vec_safe(
            &registry,
            "compression_ratio",
            "Uncompressed to compressed size ratio of wrapped batches",
            COMPRESSION_RATIO_BUCKETS,
        )?;
        let records_sent = register_int_counter_vec_safe(
            &registry,
            "records_sent_total",
            "Total number of records encoded into produce requests",
        )?;
        let records_per_request = register_histogram_vec_safe(
            &registry,
            "records_per_request",
            "Records per topic in a single produce request",
            RECORDS_PER_REQUEST_BUCKETS,
        )?;

        Ok(Self {
            registry,
            batch_size,
            compression_ratio,
            records_sent,
            records_per_request,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather all metric families from the registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.gather(), &mut buffer)
            .map_err(|e| Error::Encode(format!("metrics: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Encode(format!("metrics: {}", e)))
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe_batch_size(&self, topic: &str, bytes: usize) {
        self.batch_size
            .with_label_values(&[topic])
            .observe(bytes as f64);
    }

    fn observe_compression_ratio(&self, topic: &str, ratio: f64) {
        self.compression_ratio
            .with_label_values(&[topic])
            .observe(ratio);
    }

    fn add_records_sent(&self, topic: &str, records: u64) {
        self.records_sent.with_label_values(&[topic]).inc_by(records);
    }

    fn observe_records_per_request(&self, topic: &str, records: u64) {
        self.records_per_request
            .with_label_values(&[topic])
            .observe(records as f64);
    }
}

// ============================================================================
// Safe metric registration helpers
// ============================================================================
//
// A name collision in a shared registry is logged and the collector is used
// unregistered; only invalid metric definitions are errors.

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(opts!(name, help), &["topic"])
        .map_err(|e| Error::Config(format!("metric {}: {}", name, e)))?;
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
    }
    Ok(counter)
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    buckets: &[f64],
) -> Result<HistogramVec> {
    let histogram = HistogramVec::new(
        HistogramOpts::new(name, help).buckets(buckets.to_vec()),
        &["topic"],
    )
    .map_err(|e| Error::Config(format!("metric {}: {}", name, e)))?;
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
    }
    Ok(histogram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_metrics_accepts_observations() {
        let sink = NoopMetrics;
        sink.observe_batch_size("t", 10);
        sink.observe_compression_ratio("t", 2.0);
        sink.add_records_sent("t", 3);
        sink.observe_records_per_request("t", 3);
    }

    #[test]
    fn test_prometheus_metrics_records_by_topic() {
        let metrics = PrometheusMetrics::new("producer").unwrap();
        metrics.add_records_sent("orders", 4);
        metrics.add_records_sent("orders", 6);
        metrics.observe_batch_size("orders", 512);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("producer_records_sent_total{topic=\"orders\"} 10"));
        assert!(text.contains("producer_batch_size_bytes_count{topic=\"orders\"} 1"));
    }

    #[test]
    fn test_two_sinks_do_not_share_state() {
        let a = PrometheusMetrics::new("a").unwrap();
        let b = PrometheusMetrics::new("b").unwrap();
        a.add_records_sent("t", 1);
        assert!(!b.encode_text().unwrap().contains("records_sent_total{"));
    }

    #[test]
    fn test_shared_registry_collision_is_tolerated() {
        let registry = Registry::new();
        let first = PrometheusMetrics::with_registry(registry.clone()).unwrap();
        let second = PrometheusMetrics::with_registry(registry).unwrap();
        first.add_records_sent("t", 1);
        second.add_records_sent("t", 1);
        // the second set of collectors is unregistered
        assert!(
            first
                .encode_text()
                .unwrap()
                .contains("records_sent_total{topic=\"t\"} 1")
        );
    }
}
