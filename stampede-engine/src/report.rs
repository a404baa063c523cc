//! End-of-run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use stampede_metrics::{MetricSnapshot, ThresholdReport, ThresholdResult};
use std::fmt;
use uuid::Uuid;

/// Why the run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every stage ran to the end
    Completed,
    /// Cancelled from outside, e.g. Ctrl-C
    Cancelled,
    /// An abort-on-fail threshold was violated mid-run
    ThresholdAborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::ThresholdAborted => write!(f, "aborted by threshold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Metric summaries, threshold results and the final verdict of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub seed: u64,
    pub stop_reason: StopReason,
    pub verdict: Verdict,
    pub iterations: u64,
    /// Workers still running when the grace period expired
    pub interrupted: u64,
    pub vus_max: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<ThresholdResult>,
    pub thresholds: ThresholdReport,
    pub metrics: Vec<MetricSnapshot>,
}

impl RunReport {
    /// A run fails if any threshold failed or a threshold aborted it
    pub fn verdict_for(thresholds: &ThresholdReport, stop_reason: StopReason) -> Verdict {
        if thresholds.passed && stop_reason != StopReason::ThresholdAborted {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|metric| metric.name == name)
    }
}
