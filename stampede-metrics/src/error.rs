//! Metric error types

use crate::types::MetricKind;

/// Errors raised by the metric registry
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Metric '{name}' is a {kind} and cannot take {value}")]
    TypeMismatch {
        name: String,
        kind: MetricKind,
        value: String,
    },

    #[error("Invalid value for metric '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid histogram bounds for '{name}': {reason}")]
    InvalidBounds { name: String, reason: String },
}

/// Result type for metric operations
pub type MetricResult<T> = Result<T, MetricError>;
