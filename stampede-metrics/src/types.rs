//! Metric kinds and sample values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The aggregation applied to a metric's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum of reported values
    Counter,
    /// Last written value
    Gauge,
    /// Fraction of true samples
    Rate,
    /// All numeric samples, exact percentiles
    Trend,
    /// Bucketed numeric samples, approximate percentiles
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "rate" => Ok(MetricKind::Rate),
            "trend" => Ok(MetricKind::Trend),
            "histogram" => Ok(MetricKind::Histogram),
            _ => Err(format!("Invalid metric kind: {}", s)),
        }
    }
}

/// A single value reported to a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Bool(bool),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "number {}", n),
            MetricValue::Bool(b) => write!(f, "boolean {}", b),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}
