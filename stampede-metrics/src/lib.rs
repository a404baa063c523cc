//! Metrics for Stampede runs
//!
//! A [`MetricRegistry`] is created per run and shared by reference with every
//! virtual user. Metrics are identified by name and have one of five kinds
//! (counter, gauge, rate, trend, histogram); samples are folded into the
//! metric's aggregate as they are recorded. Thresholds are parsed from
//! `statistic comparator bound` expressions and evaluated read-only against
//! the registry.

pub mod aggregate;
pub mod error;
pub mod registry;
pub mod threshold;
pub mod types;

// Re-export main types for convenience
pub use aggregate::{
    Aggregate, CounterSummary, GaugeSummary, HistogramBucket, HistogramSummary, RateSummary,
    TrendSummary,
};
pub use error::{MetricError, MetricResult};
pub use registry::{Metric, MetricRegistry, MetricSnapshot, DEFAULT_HISTOGRAM_BOUNDS};
pub use threshold::{
    Comparator, Statistic, Threshold, ThresholdError, ThresholdEvaluator, ThresholdExpression,
    ThresholdReport, ThresholdResult,
};
pub use types::{MetricKind, MetricValue};
