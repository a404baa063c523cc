//! Built-in metrics every run records

use stampede_metrics::{Metric, MetricKind, MetricRegistry};
use std::sync::Arc;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_RECEIVED: &str = "data_received";
pub const DATA_SENT: &str = "data_sent";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

const GROUP_DURATION_PREFIX: &str = "group_duration";

/// Trend name for the wall time spent inside a (possibly nested) group
pub fn group_metric_name(path: &[String]) -> String {
    let mut name = String::from(GROUP_DURATION_PREFIX);
    for segment in path {
        name.push_str("::");
        name.push_str(segment);
    }
    name
}

/// Handles to the built-in metrics, resolved once per run
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    pub http_reqs: Arc<Metric>,
    pub http_req_duration: Arc<Metric>,
    pub http_req_failed: Arc<Metric>,
    pub data_received: Arc<Metric>,
    pub data_sent: Arc<Metric>,
    pub checks: Arc<Metric>,
    pub iterations: Arc<Metric>,
    pub iteration_duration: Arc<Metric>,
    pub vus: Arc<Metric>,
    pub vus_max: Arc<Metric>,
}

impl BuiltinMetrics {
    pub fn register(registry: &MetricRegistry) -> Self {
        Self {
            http_reqs: registry.register(HTTP_REQS, MetricKind::Counter),
            http_req_duration: registry.register(HTTP_REQ_DURATION, MetricKind::Trend),
            http_req_failed: registry.register(HTTP_REQ_FAILED, MetricKind::Rate),
            data_received: registry.register(DATA_RECEIVED, MetricKind::Counter),
            data_sent: registry.register(DATA_SENT, MetricKind::Counter),
            checks: registry.register(CHECKS, MetricKind::Rate),
            iterations: registry.register(ITERATIONS, MetricKind::Counter),
            iteration_duration: registry.register(ITERATION_DURATION, MetricKind::Trend),
            vus: registry.register(VUS, MetricKind::Gauge),
            vus_max: registry.register(VUS_MAX, MetricKind::Gauge),
        }
    }
}
