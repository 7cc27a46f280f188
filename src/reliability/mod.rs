//! Failure reporting and observability.
//!
//! - Classified failure events and pluggable sinks
//! - Metrics collection and export
//! - Logging setup

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::events::{AffinityEvent, FailureSink, FanoutSink, RecordingSink, TracingSink};
pub use self::metrics::{AffinityMetrics, MetricsSink};
pub use self::tracing::{init_tracing, TracingConfig};
