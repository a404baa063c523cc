//! Engine error types

use stampede_metrics::{MetricError, ThresholdError};

/// Errors that stop a run before any virtual user starts
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Run profile has no stages")]
    EmptyStages,

    #[error("Invalid run profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error(transparent)]
    Threshold(#[from] ThresholdError),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
