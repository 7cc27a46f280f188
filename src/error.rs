//! Custom error types for worker-affinity.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with clear messages and proper error conversion.

use std::io;
use thiserror::Error;

/// Primary error type for the crate, covering all possible error cases.
#[derive(Debug, Error)]
pub enum AffinityError {
    /// The raw topology could not be obtained at all.
    #[error("CPU topology unavailable: {0}")]
    TopologyUnavailable(String),

    /// A topology record did not decompose into four integer fields.
    #[error("Malformed topology record on line {line}: {reason}")]
    TopologyMalformed { line: usize, reason: String },

    /// The OS rejected a binding request. Reported, never returned by `apply_affinity`.
    #[error("Failed to bind pid {pid} to CPU {cpu}: {source}")]
    AffinityApplyFailed {
        pid: i32,
        cpu: usize,
        #[source]
        source: io::Error,
    },

    /// Errors from invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AffinityError {
    /// Short, stable classification label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AffinityError::TopologyUnavailable(_) => "topology_unavailable",
            AffinityError::TopologyMalformed { .. } => "topology_malformed",
            AffinityError::AffinityApplyFailed { .. } => "affinity_apply_failed",
            AffinityError::Configuration(_) => "configuration",
            AffinityError::Io(_) => "io",
            AffinityError::Internal(_) => "internal",
        }
    }

    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        AffinityError::TopologyMalformed {
            line,
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results with AffinityError.
pub type Result<T> = std::result::Result<T, AffinityError>;

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add static context to the error.
    fn with_static_context(self, context: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_static_context(self, context: &'static str) -> Result<T> {
        self.map_err(|e| AffinityError::Internal(format!("{}: {}", context, e)))
    }
}
