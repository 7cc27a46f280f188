//! Classified failure events and the sinks that surface them.
//!
//! The engine never prints. It hands an [`AffinityEvent`] to a [`FailureSink`] and
//! carries on; the sink decides whether that becomes a log line, a metric or a
//! test assertion.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

use crate::error::AffinityError;

/// A failure the engine classified and absorbed or returned.
#[derive(Debug)]
pub struct AffinityEvent {
    pub error: AffinityError,
}

impl AffinityEvent {
    pub fn new(error: AffinityError) -> Self {
        Self { error }
    }

    /// Classification label, e.g. `affinity_apply_failed`.
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

impl From<AffinityError> for AffinityEvent {
    fn from(error: AffinityError) -> Self {
        Self::new(error)
    }
}

/// Receiver of classified failure events.
pub trait FailureSink: Send + Sync {
    fn report(&self, event: AffinityEvent);
}

impl<S: FailureSink + ?Sized> FailureSink for Arc<S> {
    fn report(&self, event: AffinityEvent) {
        (**self).report(event)
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, event: AffinityEvent) {
        match &event.error {
            AffinityError::AffinityApplyFailed { pid, cpu, source } => {
                error!(
                    pid = *pid,
                    cpu = *cpu,
                    kind = event.kind(),
                    "cpu-pin was set, but the CPU affinity for PID {} could not be set to {}: {}",
                    pid,
                    cpu,
                    source
                );
            }
            other => {
                error!(kind = event.kind(), "{}", other);
            }
        }
    }
}

/// Buffers events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AffinityEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Classification labels of every recorded event, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(AffinityEvent::kind).collect()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<AffinityEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl FailureSink for RecordingSink {
    fn report(&self, event: AffinityEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards every event to several sinks.
pub struct FanoutSink {
    sinks: Vec<Box<dyn FailureSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn FailureSink>>) -> Self {
        Self { sinks }
    }
}

impl FailureSink for FanoutSink {
    fn report(&self, event: AffinityEvent) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.report(AffinityEvent::new(clone_error(&event.error)));
        }
        last.report(event);
    }
}

// io::Error is not Clone; keep kind and message.
pub(crate) fn clone_error(error: &AffinityError) -> AffinityError {
    match error {
        AffinityError::TopologyUnavailable(msg) => AffinityError::TopologyUnavailable(msg.clone()),
        AffinityError::TopologyMalformed { line, reason } => AffinityError::TopologyMalformed {
            line: *line,
            reason: reason.clone(),
        },
        AffinityError::AffinityApplyFailed { pid, cpu, source } => {
            AffinityError::AffinityApplyFailed {
                pid: *pid,
                cpu: *cpu,
                source: clone_io(source),
            }
        }
        AffinityError::Configuration(msg) => AffinityError::Configuration(msg.clone()),
        AffinityError::Io(e) => AffinityError::Io(clone_io(e)),
        AffinityError::Internal(msg) => AffinityError::Internal(msg.clone()),
    }
}

fn clone_io(e: &std::io::Error) -> std::io::Error {
    match e.raw_os_error() {
        Some(code) => std::io::Error::from_raw_os_error(code),
        None => std::io::Error::new(e.kind(), e.to_string()),
    }
}
