//! Threshold expressions and their evaluation
//!
//! An expression is `statistic comparator bound`, e.g. `p(95)<500`,
//! `rate<0.1` or `avg <= 1.5s`. Bounds with an `ms` or `s` suffix are
//! normalised to milliseconds, the unit all timing metrics are recorded in.

use crate::registry::MetricRegistry;
use crate::types::MetricKind;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Errors detected while parsing or validating thresholds
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("Invalid threshold '{expression}': {reason}")]
    Syntax { expression: String, reason: String },

    #[error("Threshold on '{0}' refers to a metric that is not registered")]
    UnknownMetric(String),

    #[error("Threshold '{expression}' on '{metric}': statistic '{statistic}' does not apply to a {kind}")]
    NotApplicable {
        metric: String,
        expression: String,
        statistic: Statistic,
        kind: MetricKind,
    },
}

/// The aggregate a threshold reads
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Count,
    Sum,
    Rate,
    Value,
}

impl Statistic {
    /// Whether a metric of `kind` can answer this statistic
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => {
                matches!(self, Statistic::Count | Statistic::Sum | Statistic::Rate)
            }
            MetricKind::Gauge => matches!(self, Statistic::Value | Statistic::Min | Statistic::Max),
            MetricKind::Rate => matches!(self, Statistic::Rate),
            MetricKind::Trend | MetricKind::Histogram => !matches!(
                self,
                Statistic::Rate | Statistic::Value
            ),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Percentile(p) => write!(f, "p({})", p),
            Statistic::Avg => f.write_str("avg"),
            Statistic::Min => f.write_str("min"),
            Statistic::Max => f.write_str("max"),
            Statistic::Med => f.write_str("med"),
            Statistic::Count => f.write_str("count"),
            Statistic::Sum => f.write_str("sum"),
            Statistic::Rate => f.write_str("rate"),
            Statistic::Value => f.write_str("value"),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_lowercase();

        let percentile = lower
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| lower.strip_prefix('p').filter(|rest| !rest.is_empty()));

        if let Some(number) = percentile {
            let p: f64 = number
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentile '{}'", s))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(format!("percentile {} is outside 0..=100", p));
            }
            return Ok(Statistic::Percentile(p));
        }

        match lower.as_str() {
            "avg" | "mean" => Ok(Statistic::Avg),
            "min" => Ok(Statistic::Min),
            "max" => Ok(Statistic::Max),
            "med" | "median" => Ok(Statistic::Med),
            "count" => Ok(Statistic::Count),
            "sum" => Ok(Statistic::Sum),
            "rate" => Ok(Statistic::Rate),
            "value" => Ok(Statistic::Value),
            _ => Err(format!("unknown statistic '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
            Comparator::Ne => observed != bound,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `statistic comparator bound` predicate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdExpression {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub bound: f64,
}

impl ThresholdExpression {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparator.holds(observed, self.bound)
    }
}

impl fmt::Display for ThresholdExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.statistic, self.comparator, self.bound)
    }
}

impl FromStr for ThresholdExpression {
    type Err = ThresholdError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let syntax = |reason: String| ThresholdError::Syntax {
            expression: expression.to_string(),
            reason,
        };

        let position = expression
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| syntax("missing comparator".to_string()))?;
        let (statistic, rest) = expression.split_at(position);

        let (comparator, bound) = [
            ("<=", Comparator::Le),
            (">=", Comparator::Ge),
            ("==", Comparator::Eq),
            ("!=", Comparator::Ne),
            ("<", Comparator::Lt),
            (">", Comparator::Gt),
        ]
        .into_iter()
        .find_map(|(token, comparator)| rest.strip_prefix(token).map(|bound| (comparator, bound)))
        .ok_or_else(|| syntax(format!("unknown comparator in '{}'", rest)))?;

        if statistic.trim().is_empty() {
            return Err(syntax("missing statistic".to_string()));
        }
        let statistic = statistic.parse::<Statistic>().map_err(syntax)?;
        let bound = parse_bound(bound).map_err(syntax)?;

        Ok(Self {
            statistic,
            comparator,
            bound,
        })
    }
}

/// Parse a numeric bound; `ms` and `s` suffixes yield milliseconds
fn parse_bound(bound: &str) -> Result<f64, String> {
    let bound = bound.trim();
    if bound.is_empty() {
        return Err("missing bound".to_string());
    }

    let (number, scale) = if let Some(number) = bound.strip_suffix("ms") {
        (number, 1.0)
    } else if let Some(number) = bound.strip_suffix('s') {
        (number, 1000.0)
    } else {
        (bound, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid bound '{}'", bound))?;
    if !value.is_finite() {
        return Err(format!("bound '{}' is not finite", bound));
    }
    Ok(value * scale)
}

/// A pass/fail condition over one metric
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    /// The expression as written
    pub source: String,
    pub expression: ThresholdExpression,
    /// Stop the run as soon as this threshold is violated
    pub abort_on_fail: bool,
    /// Run time to wait before abort checks apply
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn parse(metric: impl Into<String>, source: &str) -> Result<Self, ThresholdError> {
        Ok(Self {
            metric: metric.into(),
            source: source.trim().to_string(),
            expression: source.parse()?,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric had no samples
    pub observed: Option<f64>,
    pub bound: f64,
    pub passed: bool,
}

/// Every threshold's outcome plus the overall verdict
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ThresholdReport {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl ThresholdReport {
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|result| !result.passed)
    }
}

/// Evaluates thresholds against a registry without mutating it
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Check every threshold names a registered metric and a statistic it supports
    pub fn validate(&self, registry: &MetricRegistry) -> Result<(), ThresholdError> {
        for threshold in &self.thresholds {
            let kind = registry
                .kind(&threshold.metric)
                .ok_or_else(|| ThresholdError::UnknownMetric(threshold.metric.clone()))?;

            if !threshold.expression.statistic.applies_to(kind) {
                return Err(ThresholdError::NotApplicable {
                    metric: threshold.metric.clone(),
                    expression: threshold.source.clone(),
                    statistic: threshold.expression.statistic,
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Evaluate all thresholds; a metric without samples counts as passing
    pub fn evaluate(&self, registry: &MetricRegistry) -> ThresholdReport {
        let results: Vec<ThresholdResult> = self
            .thresholds
            .iter()
            .map(|threshold| Self::evaluate_one(threshold, registry))
            .collect();
        let passed = results.iter().all(|result| result.passed);

        ThresholdReport { results, passed }
    }

    /// First abort-on-fail threshold that is currently violated, if any
    pub fn check_abort(
        &self,
        registry: &MetricRegistry,
        elapsed: Duration,
    ) -> Option<ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|threshold| threshold.abort_on_fail && elapsed >= threshold.delay_abort_eval)
            .map(|threshold| Self::evaluate_one(threshold, registry))
            .find(|result| !result.passed)
    }

    fn evaluate_one(threshold: &Threshold, registry: &MetricRegistry) -> ThresholdResult {
        let expression = threshold.expression;
        let observed = registry.statistic(&threshold.metric, expression.statistic);

        let (observed, passed) = match observed {
            Ok(Some(value)) => (Some(value), expression.holds(value)),
            Ok(None) => {
                warn!(
                    "Threshold '{}' on '{}' has no data",
                    threshold.source, threshold.metric
                );
                (None, true)
            }
            Err(e) => {
                warn!("Threshold '{}' could not be evaluated: {}", threshold.source, e);
                (None, false)
            }
        };

        ThresholdResult {
            metric: threshold.metric.clone(),
            expression: threshold.source.clone(),
            observed,
            bound: expression.bound,
            passed,
        }
    }
}
