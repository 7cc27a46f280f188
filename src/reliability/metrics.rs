//! Prometheus metrics for placement and affinity application.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use super::events::{AffinityEvent, FailureSink};
use crate::constants::metrics::{APPLIED_TOTAL, EVENTS_TOTAL, PICKS_TOTAL, SKIPPED_TOTAL};
use crate::error::{ErrorContext, Result};

/// Metrics recorder for the affinity engine.
pub struct AffinityMetrics {
    /// Prometheus handle for exporting metrics.
    prometheus_handle: PrometheusHandle,
}

impl AffinityMetrics {
    /// Install a process-wide Prometheus recorder.
    pub fn install() -> Result<Self> {
        let prometheus_handle = PrometheusBuilder::new()
            .install_recorder()
            .with_static_context("installing Prometheus recorder")?;

        register_metrics();
        info!("Metrics collection initialized");

        Ok(Self { prometheus_handle })
    }

    /// Get the Prometheus metrics as a string.
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Register all metrics with their descriptions.
pub fn register_metrics() {
    describe_counter!(PICKS_TOTAL, "Worker CPU selections, by logical CPU");
    describe_counter!(APPLIED_TOTAL, "Successful affinity bindings, by logical CPU");
    describe_counter!(
        SKIPPED_TOTAL,
        "affinity calls that issued no syscall, by reason"
    );
    describe_counter!(EVENTS_TOTAL, "Classified failure events, by kind");
}

pub fn record_pick(cpu: usize) {
    counter!(PICKS_TOTAL, "cpu" => cpu.to_string()).increment(1);
}

pub fn record_applied(cpu: usize) {
    counter!(APPLIED_TOTAL, "cpu" => cpu.to_string()).increment(1);
}

pub fn record_skipped(reason: &'static str) {
    counter!(SKIPPED_TOTAL, "reason" => reason).increment(1);
}

/// Counts events by kind, then forwards them to an inner sink.
pub struct MetricsSink<S> {
    inner: S,
}

impl<S: FailureSink> MetricsSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: FailureSink> FailureSink for MetricsSink<S> {
    fn report(&self, event: AffinityEvent) {
        counter!(EVENTS_TOTAL, "kind" => event.kind()).increment(1);
        self.inner.report(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AffinityError;
    use crate::reliability::events::RecordingSink;
    use std::sync::Arc;

    #[test]
    fn test_metrics_sink_forwards() {
        // No recorder installed: counters are no-ops, forwarding still happens.
        let recording = Arc::new(RecordingSink::new());
        let sink = MetricsSink::new(recording.clone());

        sink.report(AffinityError::TopologyUnavailable("x".into()).into());
        record_pick(0);
        record_applied(0);
        record_skipped("disabled");

        assert_eq!(recording.kinds(), vec!["topology_unavailable"]);
    }
}
