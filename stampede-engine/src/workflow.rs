//! Workflow model: the ordered steps a virtual user repeats every iteration
//!
//! Steps are plain data plus closures over the [`IterationContext`], so one
//! executor can run any workflow. Requests, conditions and extractors are
//! closures because they read data captured earlier in the iteration.

use crate::context::IterationContext;
use crate::error::{EngineError, EngineResult};
use crate::metrics::group_metric_name;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use stampede_http::{HttpRequest, HttpResponse};
use stampede_metrics::{MetricKind, MetricRegistry, MetricValue};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds the request for a step; `None` skips the step
pub type RequestFn = Arc<dyn Fn(&mut IterationContext<'_>) -> Option<HttpRequest> + Send + Sync>;
/// Predicate over a completed response
pub type CheckFn = Arc<dyn Fn(&HttpResponse, &IterationContext<'_>) -> bool + Send + Sync>;
/// Data-dependent condition
pub type ConditionFn = Arc<dyn Fn(&IterationContext<'_>) -> bool + Send + Sync>;
/// Pulls a value out of a parsed JSON body
pub type ExtractFn =
    Arc<dyn Fn(&Value, &mut IterationContext<'_>) -> Option<Value> + Send + Sync>;

/// One step of a workflow
#[derive(Clone)]
pub enum Step {
    Request(RequestStep),
    Check(CheckStep),
    Sleep(SleepStep),
    Branch(BranchStep),
    Group(GroupStep),
    Repeat(RepeatStep),
    When(WhenStep),
    Extract(ExtractStep),
    Metric(MetricStep),
}

impl Step {
    pub fn request<F>(name: impl Into<String>, build: F) -> RequestStep
    where
        F: Fn(&mut IterationContext<'_>) -> Option<HttpRequest> + Send + Sync + 'static,
    {
        RequestStep::new(name, build)
    }

    pub fn check() -> CheckStep {
        CheckStep::default()
    }

    pub fn sleep(duration: Duration) -> Step {
        Step::Sleep(SleepStep::Fixed(duration))
    }

    /// Sleep for a uniformly random duration drawn from the VU's random source
    pub fn sleep_between(min: Duration, max: Duration) -> Step {
        Step::Sleep(SleepStep::Uniform { min, max })
    }

    pub fn branch() -> BranchStep {
        BranchStep::default()
    }

    pub fn group(name: impl Into<String>, steps: Vec<Step>) -> Step {
        Step::Group(GroupStep {
            name: name.into(),
            steps,
        })
    }

    pub fn repeat(times: u32, steps: Vec<Step>) -> Step {
        Step::Repeat(RepeatStep { times, steps })
    }

    pub fn when<F>(condition: F, then: Vec<Step>) -> WhenStep
    where
        F: Fn(&IterationContext<'_>) -> bool + Send + Sync + 'static,
    {
        WhenStep {
            condition: Arc::new(condition),
            then,
            otherwise: Vec::new(),
        }
    }

    /// Run `then` only if the variable is set
    pub fn when_var(var: impl Into<String>, then: Vec<Step>) -> WhenStep {
        let var = var.into();
        Step::when(move |ctx| ctx.var(&var).is_some(), then)
    }

    pub fn extract<F>(name: impl Into<String>, var: impl Into<String>, extract: F) -> ExtractStep
    where
        F: Fn(&Value, &mut IterationContext<'_>) -> Option<Value> + Send + Sync + 'static,
    {
        ExtractStep {
            name: name.into(),
            var: var.into(),
            extract: Arc::new(extract),
            escalate: None,
        }
    }

    /// Extract the non-null value at a JSON pointer such as `/id`
    pub fn extract_pointer(
        name: impl Into<String>,
        var: impl Into<String>,
        pointer: impl Into<String>,
    ) -> ExtractStep {
        let pointer = pointer.into();
        Step::extract(name, var, move |body, _| {
            body.pointer(&pointer).filter(|v| !v.is_null()).cloned()
        })
    }

    pub fn counter_add(name: impl Into<String>, value: f64) -> Step {
        MetricStep::new(name, MetricKind::Counter, MetricAction::Add(value)).into()
    }

    pub fn gauge_add(name: impl Into<String>, delta: f64) -> Step {
        MetricStep::new(name, MetricKind::Gauge, MetricAction::Add(delta)).into()
    }

    pub fn gauge_set(name: impl Into<String>, value: f64) -> Step {
        MetricStep::new(name, MetricKind::Gauge, MetricAction::Set(value)).into()
    }

    pub fn rate(name: impl Into<String>, value: bool) -> Step {
        MetricStep::new(name, MetricKind::Rate, MetricAction::Sample(value.into())).into()
    }

    pub fn trend(name: impl Into<String>, value: f64) -> Step {
        MetricStep::new(name, MetricKind::Trend, MetricAction::Sample(value.into())).into()
    }

    /// Record the last response's duration (ms) into a trend
    pub fn trend_last_duration(name: impl Into<String>) -> Step {
        MetricStep::new(name, MetricKind::Trend, MetricAction::LastDuration).into()
    }

    /// Record the last response's body size (bytes) into a histogram
    pub fn histogram_last_size(name: impl Into<String>) -> Step {
        MetricStep::new(name, MetricKind::Histogram, MetricAction::LastSize).into()
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Step::Request(_) => "request",
            Step::Check(_) => "check",
            Step::Sleep(_) => "sleep",
            Step::Branch(_) => "branch",
            Step::Group(_) => "group",
            Step::Repeat(_) => "repeat",
            Step::When(_) => "when",
            Step::Extract(_) => "extract",
            Step::Metric(_) => "metric",
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Request(step) => write!(f, "Request({})", step.name),
            Step::Check(step) => f
                .debug_list()
                .entries(step.checks.iter().map(|check| &check.name))
                .finish(),
            Step::Sleep(step) => write!(f, "{:?}", step),
            Step::Branch(step) => f.debug_list().entries(&step.arms).finish(),
            Step::Group(step) => f.debug_tuple("Group").field(&step.name).field(&step.steps).finish(),
            Step::Repeat(step) => f.debug_tuple("Repeat").field(&step.times).field(&step.steps).finish(),
            Step::Extract(step) => write!(f, "Extract({} -> {})", step.name, step.var),
            Step::Metric(step) => write!(f, "Metric({}: {:?})", step.name, step.action),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// Issue one HTTP request
#[derive(Clone)]
pub struct RequestStep {
    pub name: String,
    pub build: RequestFn,
    /// Per-call timeout, unless the built request sets its own
    pub timeout: Option<Duration>,
    /// Extra trends receiving this request's duration
    pub trends: Vec<String>,
    /// Histogram receiving this response's body size
    pub size_histogram: Option<String>,
    /// Skip the rest of the iteration on a transport failure
    pub abort_on_failure: bool,
}

impl RequestStep {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&mut IterationContext<'_>) -> Option<HttpRequest> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
            timeout: None,
            trends: Vec::new(),
            size_histogram: None,
            abort_on_failure: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn trend(mut self, metric: impl Into<String>) -> Self {
        self.trends.push(metric.into());
        self
    }

    pub fn size_histogram(mut self, metric: impl Into<String>) -> Self {
        self.size_histogram = Some(metric.into());
        self
    }

    pub fn abort_on_failure(mut self) -> Self {
        self.abort_on_failure = true;
        self
    }
}

/// A named predicate
#[derive(Clone)]
pub struct NamedCheck {
    pub name: String,
    pub predicate: CheckFn,
}

/// Assertions over the last response
///
/// Every check records a sample under its own name and into `checks`. When
/// the last request failed in transport, every check fails.
#[derive(Clone, Default)]
pub struct CheckStep {
    pub checks: Vec<NamedCheck>,
    /// Rate metric receiving `true` whenever any check fails
    pub escalate: Option<String>,
    pub on_pass: Vec<Step>,
    pub on_fail: Vec<Step>,
}

impl CheckStep {
    pub fn check<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&HttpResponse, &IterationContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.checks.push(NamedCheck {
            name: name.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    pub fn status(self, name: impl Into<String>, status: u16) -> Self {
        self.check(name, move |response, _| response.status == status)
    }

    /// Body parses as JSON
    pub fn json(self, name: impl Into<String>) -> Self {
        self.check(name, |response, _| response.json_value().is_ok())
    }

    /// Body parses as a JSON array
    pub fn json_array(self, name: impl Into<String>) -> Self {
        self.check(name, |response, _| {
            response
                .json_value()
                .map(|body| body.is_array())
                .unwrap_or(false)
        })
    }

    pub fn escalate(mut self, metric: impl Into<String>) -> Self {
        self.escalate = Some(metric.into());
        self
    }

    pub fn on_pass(mut self, steps: Vec<Step>) -> Self {
        self.on_pass = steps;
        self
    }

    pub fn on_fail(mut self, steps: Vec<Step>) -> Self {
        self.on_fail = steps;
        self
    }
}

/// Suspend only the issuing virtual user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStep {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
}

impl SleepStep {
    pub fn duration(&self, rng: &mut StdRng) -> Duration {
        match *self {
            SleepStep::Fixed(duration) => duration,
            SleepStep::Uniform { min, max } if min >= max => min,
            SleepStep::Uniform { min, max } => {
                Duration::from_secs_f64(rng.random_range(min.as_secs_f64()..=max.as_secs_f64()))
            }
        }
    }
}

/// One weighted arm of a branch
#[derive(Debug, Clone)]
pub struct BranchArm {
    pub probability: f64,
    pub steps: Vec<Step>,
}

/// Pick at most one arm with a single draw from the VU's random source
#[derive(Debug, Clone, Default)]
pub struct BranchStep {
    pub arms: Vec<BranchArm>,
    pub otherwise: Vec<Step>,
}

impl BranchStep {
    pub fn arm(mut self, probability: f64, steps: Vec<Step>) -> Self {
        self.arms.push(BranchArm { probability, steps });
        self
    }

    pub fn otherwise(mut self, steps: Vec<Step>) -> Self {
        self.otherwise = steps;
        self
    }

    /// Index of the chosen arm, `None` for the fallback
    pub fn choose(&self, rng: &mut StdRng) -> Option<usize> {
        let draw: f64 = rng.random();
        let mut cumulative = 0.0;
        for (index, arm) in self.arms.iter().enumerate() {
            cumulative += arm.probability;
            if draw < cumulative {
                return Some(index);
            }
        }
        None
    }

    pub fn steps_for(&self, choice: Option<usize>) -> &[Step] {
        match choice {
            Some(index) => self.arms.get(index).map_or(&[][..], |arm| &arm.steps),
            None => &self.otherwise,
        }
    }
}

/// Named scope; its duration is recorded under `group_duration::<path>`
#[derive(Debug, Clone)]
pub struct GroupStep {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct RepeatStep {
    pub times: u32,
    pub steps: Vec<Step>,
}

/// Run `then` if the condition holds, `otherwise` if not
#[derive(Clone)]
pub struct WhenStep {
    pub condition: ConditionFn,
    pub then: Vec<Step>,
    pub otherwise: Vec<Step>,
}

impl WhenStep {
    pub fn otherwise(mut self, steps: Vec<Step>) -> Self {
        self.otherwise = steps;
        self
    }
}

/// Parse the last response body and store a value as an iteration variable
///
/// Failure to parse or extract counts as a failed check under `name`, and the
/// variable is left unset so dependent steps skip.
#[derive(Clone)]
pub struct ExtractStep {
    pub name: String,
    pub var: String,
    pub extract: ExtractFn,
    pub escalate: Option<String>,
}

impl ExtractStep {
    pub fn escalate(mut self, metric: impl Into<String>) -> Self {
        self.escalate = Some(metric.into());
        self
    }
}

/// Explicit write to a custom metric
#[derive(Debug, Clone)]
pub struct MetricStep {
    pub name: String,
    pub kind: MetricKind,
    pub action: MetricAction,
}

impl MetricStep {
    pub fn new(name: impl Into<String>, kind: MetricKind, action: MetricAction) -> Self {
        Self {
            name: name.into(),
            kind,
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricAction {
    /// Counter increment or gauge delta
    Add(f64),
    /// New gauge reading
    Set(f64),
    Sample(MetricValue),
    /// Duration of the last response in milliseconds
    LastDuration,
    /// Body size of the last response in bytes
    LastSize,
}

impl MetricAction {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            MetricAction::Add(_) => matches!(kind, MetricKind::Counter | MetricKind::Gauge),
            MetricAction::Set(_) => kind == MetricKind::Gauge,
            MetricAction::Sample(MetricValue::Bool(_)) => kind == MetricKind::Rate,
            MetricAction::Sample(MetricValue::Number(_)) => kind != MetricKind::Rate,
            MetricAction::LastDuration => {
                matches!(kind, MetricKind::Trend | MetricKind::Histogram)
            }
            MetricAction::LastSize => matches!(
                kind,
                MetricKind::Trend | MetricKind::Histogram | MetricKind::Counter
            ),
        }
    }
}

macro_rules! impl_into_step {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for Step {
            fn from(step: $ty) -> Self {
                Step::$variant(step)
            }
        })*
    };
}

impl_into_step!(
    Request(RequestStep),
    Check(CheckStep),
    Sleep(SleepStep),
    Branch(BranchStep),
    Group(GroupStep),
    Repeat(RepeatStep),
    When(WhenStep),
    Extract(ExtractStep),
    Metric(MetricStep),
);

#[derive(Debug, Clone)]
struct MetricDeclaration {
    name: String,
    kind: MetricKind,
    bounds: Option<Vec<f64>>,
}

/// A named, reusable sequence of steps plus the custom metrics it declares
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    steps: Vec<Step>,
    declarations: Vec<MetricDeclaration>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            declarations: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Declare a custom metric up front so thresholds can refer to it
    pub fn metric(mut self, name: impl Into<String>, kind: MetricKind) -> Self {
        self.declarations.push(MetricDeclaration {
            name: name.into(),
            kind,
            bounds: None,
        });
        self
    }

    pub fn histogram(mut self, name: impl Into<String>, bounds: &[f64]) -> Self {
        self.declarations.push(MetricDeclaration {
            name: name.into(),
            kind: MetricKind::Histogram,
            bounds: Some(bounds.to_vec()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Structural checks run before any virtual user starts
    pub fn validate(&self) -> EngineResult<()> {
        if self.steps.is_empty() {
            return Err(self.invalid("workflow has no steps".to_string()));
        }
        validate_steps(&self.steps).map_err(|reason| self.invalid(reason))
    }

    /// Register every metric the workflow declares or writes to
    ///
    /// Explicit declarations go first so histogram bounds given there win.
    pub fn register_metrics(&self, registry: &MetricRegistry) -> EngineResult<()> {
        for declaration in &self.declarations {
            match &declaration.bounds {
                Some(bounds) => {
                    registry.register_histogram(&declaration.name, bounds)?;
                }
                None => {
                    registry.register(&declaration.name, declaration.kind);
                }
            }
        }

        let mut path = Vec::new();
        register_steps(&self.steps, registry, &mut path);
        Ok(())
    }

    fn invalid(&self, reason: String) -> EngineError {
        EngineError::InvalidWorkflow {
            workflow: self.name.clone(),
            reason,
        }
    }
}

fn validate_steps(steps: &[Step]) -> Result<(), String> {
    for step in steps {
        match step {
            Step::Request(request) => {
                if request.name.trim().is_empty() {
                    return Err("request step without a name".to_string());
                }
                if request.timeout.is_some_and(|t| t.is_zero()) {
                    return Err(format!("request '{}' has a zero timeout", request.name));
                }
            }
            Step::Check(check) => {
                if check.checks.is_empty() {
                    return Err("check step without any predicate".to_string());
                }
                if let Some(check) = check.checks.iter().find(|c| c.name.trim().is_empty()) {
                    return Err(format!("check with an empty name: {:?}", check.name));
                }
                validate_steps(&check.on_pass)?;
                validate_steps(&check.on_fail)?;
            }
            Step::Sleep(SleepStep::Uniform { min, max }) if min > max => {
                return Err(format!("sleep range {:?}..{:?} is inverted", min, max));
            }
            Step::Sleep(_) => {}
            Step::Branch(branch) => {
                let mut total = 0.0;
                for arm in &branch.arms {
                    if !(0.0..=1.0).contains(&arm.probability) {
                        return Err(format!(
                            "branch probability {} is outside 0..=1",
                            arm.probability
                        ));
                    }
                    total += arm.probability;
                    validate_steps(&arm.steps)?;
                }
                if total > 1.0 + 1e-9 {
                    return Err(format!("branch probabilities sum to {}", total));
                }
                validate_steps(&branch.otherwise)?;
            }
            Step::Group(group) => {
                if group.name.trim().is_empty() {
                    return Err("group without a name".to_string());
                }
                validate_steps(&group.steps)?;
            }
            Step::Repeat(repeat) => validate_steps(&repeat.steps)?,
            Step::When(when) => {
                validate_steps(&when.then)?;
                validate_steps(&when.otherwise)?;
            }
            Step::Extract(extract) => {
                if extract.name.trim().is_empty() || extract.var.trim().is_empty() {
                    return Err("extract step needs a name and a variable".to_string());
                }
            }
            Step::Metric(metric) => {
                if metric.name.trim().is_empty() {
                    return Err("metric step without a metric name".to_string());
                }
                if !metric.action.applies_to(metric.kind) {
                    return Err(format!(
                        "{:?} cannot be applied to {} '{}'",
                        metric.action, metric.kind, metric.name
                    ));
                }
            }
        }
    }
    Ok(())
}

fn register_steps(steps: &[Step], registry: &MetricRegistry, path: &mut Vec<String>) {
    for step in steps {
        match step {
            Step::Request(request) => {
                for trend in &request.trends {
                    registry.register(trend, MetricKind::Trend);
                }
                if let Some(histogram) = &request.size_histogram {
                    registry.register(histogram, MetricKind::Histogram);
                }
            }
            Step::Check(check) => {
                for named in &check.checks {
                    registry.register(&named.name, MetricKind::Rate);
                }
                if let Some(escalate) = &check.escalate {
                    registry.register(escalate, MetricKind::Rate);
                }
                register_steps(&check.on_pass, registry, path);
                register_steps(&check.on_fail, registry, path);
            }
            Step::Sleep(_) => {}
            Step::Branch(branch) => {
                for arm in &branch.arms {
                    register_steps(&arm.steps, registry, path);
                }
                register_steps(&branch.otherwise, registry, path);
            }
            Step::Group(group) => {
                path.push(group.name.clone());
                registry.register(&group_metric_name(path), MetricKind::Trend);
                register_steps(&group.steps, registry, path);
                path.pop();
            }
            Step::Repeat(repeat) => register_steps(&repeat.steps, registry, path),
            Step::When(when) => {
                register_steps(&when.then, registry, path);
                register_steps(&when.otherwise, registry, path);
            }
            Step::Extract(extract) => {
                registry.register(&extract.name, MetricKind::Rate);
                if let Some(escalate) = &extract.escalate {
                    registry.register(escalate, MetricKind::Rate);
                }
            }
            Step::Metric(metric) => {
                registry.register(&metric.name, metric.kind);
            }
        }
    }
}
