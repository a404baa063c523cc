//! Built-in scenarios against the users/orders API
//!
//! Each scenario pairs a workflow with the stages and thresholds it runs
//! with when the configuration does not name its own.

pub mod load;
pub mod stress;

use clap::ValueEnum;
use rand::Rng;
use serde_json::Value;
use stampede_config::RunConfig;
use stampede_engine::{EngineResult, IterationContext, RunProfile, Stage, Workflow};
use std::fmt;
use std::time::Duration;

/// Order statuses accepted by the orders API
pub const ORDER_STATUSES: [&str; 6] = [
    "PENDING",
    "CONFIRMED",
    "PROCESSING",
    "SHIPPED",
    "DELIVERED",
    "CANCELLED",
];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Users CRUD followed by order management, up to 100 VUs
    Load,
    /// Weighted user-lifecycle and browse-and-order flows, up to 200 VUs
    Stress,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::Load, ScenarioKind::Stress];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Load => "load",
            ScenarioKind::Stress => "stress",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::Load => "Users CRUD followed by order management, up to 100 VUs",
            ScenarioKind::Stress => {
                "30% user lifecycle, 70% browse-and-order with rapid browsing, up to 200 VUs"
            }
        }
    }

    pub fn scenario(&self) -> Scenario {
        match self {
            ScenarioKind::Load => load::scenario(),
            ScenarioKind::Stress => stress::scenario(),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A workflow with its default run shape
pub struct Scenario {
    pub kind: ScenarioKind,
    pub workflow: Workflow,
    pub stages: Vec<Stage>,
    /// `(metric, expression)` pairs
    pub thresholds: Vec<(&'static str, &'static str)>,
}

impl Scenario {
    /// Build the run profile, letting configured stages and thresholds replace the defaults
    pub fn profile(&self, config: &RunConfig) -> EngineResult<RunProfile> {
        let mut profile = RunProfile::from_config(config)?;

        if profile.stages.is_empty() {
            profile.stages = self.stages.clone();
        }
        if config.thresholds.is_empty() {
            for (metric, expression) in &self.thresholds {
                profile = profile.with_threshold(metric, expression)?;
            }
        }

        Ok(profile)
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Keep the body if it is a JSON array
pub fn json_array(body: &Value, _ctx: &mut IterationContext<'_>) -> Option<Value> {
    body.is_array().then(|| body.clone())
}

/// Keep the body if it is an object carrying an `id`
pub fn json_entity(body: &Value, _ctx: &mut IterationContext<'_>) -> Option<Value> {
    body.get("id").filter(|id| !id.is_null())?;
    Some(body.clone())
}

/// Whether the variable holds a non-empty array
pub fn has_items(ctx: &IterationContext<'_>, var: &str) -> bool {
    ctx.var(var)
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

/// Uniformly pick one element of an array variable using the VU's random source
pub fn pick(ctx: &mut IterationContext<'_>, var: &str) -> Option<Value> {
    let len = ctx.var(var)?.as_array()?.len();
    if len == 0 {
        return None;
    }
    let index = ctx.rng().random_range(0..len);
    ctx.var(var)?.as_array()?.get(index).cloned()
}

/// Uniformly pick an order status from the first `count` statuses
pub fn random_status(ctx: &mut IterationContext<'_>, count: usize) -> &'static str {
    let count = count.clamp(1, ORDER_STATUSES.len());
    ORDER_STATUSES[ctx.rng().random_range(0..count)]
}

/// Append a value to an array variable, creating it if needed
pub fn push_var(ctx: &mut IterationContext<'_>, var: &str, value: Value) {
    let mut items = match ctx.remove_var(var) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    items.push(value);
    ctx.set_var(var, Value::Array(items));
}

/// Bump an integer variable and return its previous value
pub fn next_index(ctx: &mut IterationContext<'_>, var: &str) -> i64 {
    let current = ctx.var_i64(var).unwrap_or(0);
    ctx.set_var(var, current + 1);
    current
}

/// Numeric id of a JSON entity, rendered for a URL path
pub fn entity_id(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Percent-encode a single path segment
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
