//! Per-iteration state owned by one virtual user

use rand::rngs::StdRng;
use serde_json::Value;
use stampede_http::HttpResponse;
use stampede_metrics::Metric;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// What happened to the most recent request step
#[derive(Debug)]
enum LastRequest {
    Completed(HttpResponse),
    Failed(String),
    /// The builder had nothing to send; holds the step name
    Skipped(String),
}

/// Gauge moves made by an iteration that has not finished yet
///
/// Dropping an unsettled ledger takes the moves back, so an aborted or
/// interrupted iteration does not leave `active_users` style gauges raised.
#[derive(Debug, Default)]
struct OpenGauges {
    moves: HashMap<String, (Arc<Metric>, f64)>,
}

impl Drop for OpenGauges {
    fn drop(&mut self) {
        for (name, (metric, delta)) in self.moves.drain() {
            if delta == 0.0 {
                continue;
            }
            if let Err(e) = metric.add(-delta) {
                warn!("Failed to restore gauge '{}': {}", name, e);
            }
        }
    }
}

/// State visible to the steps of a single iteration
///
/// Variables and the last response live only for the iteration; the random
/// source is the virtual user's own and persists across its iterations.
#[derive(Debug)]
pub struct IterationContext<'a> {
    vu_id: u64,
    iteration: u64,
    rng: &'a mut StdRng,
    vars: HashMap<String, Value>,
    last_request: Option<LastRequest>,
    group_path: Vec<String>,
    gauges: OpenGauges,
}

impl<'a> IterationContext<'a> {
    pub fn new(vu_id: u64, iteration: u64, rng: &'a mut StdRng) -> Self {
        Self {
            vu_id,
            iteration,
            rng,
            vars: HashMap::new(),
            last_request: None,
            group_path: Vec::new(),
            gauges: OpenGauges::default(),
        }
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The virtual user's seeded random source
    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn var_str(&self, name: &str) -> Option<&str> {
        self.var(name).and_then(Value::as_str)
    }

    pub fn var_i64(&self, name: &str) -> Option<i64> {
        self.var(name).and_then(Value::as_i64)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove_var(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    /// The most recent response, if the last request completed
    pub fn last_response(&self) -> Option<&HttpResponse> {
        match &self.last_request {
            Some(LastRequest::Completed(response)) => Some(response),
            _ => None,
        }
    }

    /// Transport error of the most recent request, if it failed
    pub fn last_error(&self) -> Option<&str> {
        match &self.last_request {
            Some(LastRequest::Failed(error)) => Some(error),
            _ => None,
        }
    }

    /// Name of the most recent request step, if it was skipped for missing inputs
    pub fn last_skipped(&self) -> Option<&str> {
        match &self.last_request {
            Some(LastRequest::Skipped(name)) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn set_last_response(&mut self, response: Result<HttpResponse, String>) {
        self.last_request = Some(match response {
            Ok(response) => LastRequest::Completed(response),
            Err(error) => LastRequest::Failed(error),
        });
    }

    pub(crate) fn mark_skipped(&mut self, step: &str) {
        self.last_request = Some(LastRequest::Skipped(step.to_string()));
    }

    /// Remember a gauge move so it can be taken back if the iteration never finishes
    pub(crate) fn note_gauge_move(&mut self, metric: &Arc<Metric>, delta: f64) {
        self.gauges
            .moves
            .entry(metric.name().to_string())
            .or_insert_with(|| (Arc::clone(metric), 0.0))
            .1 += delta;
    }

    /// The iteration ran to its end; its gauge moves stand
    pub(crate) fn settle_gauges(&mut self) {
        self.gauges.moves.clear();
    }

    /// Names of the enclosing groups, outermost first
    pub fn group_path(&self) -> &[String] {
        &self.group_path
    }

    pub(crate) fn enter_group(&mut self, name: &str) {
        self.group_path.push(name.to_string());
    }

    pub(crate) fn leave_group(&mut self) {
        self.group_path.pop();
    }
}
