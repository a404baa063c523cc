//! Run-scoped metric registry

use crate::aggregate::{Aggregate, HistogramState, MetricState};
use crate::error::{MetricError, MetricResult};
use crate::threshold::Statistic;
use crate::types::{MetricKind, MetricValue};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Histogram bounds used when none are given: latency buckets in milliseconds
pub const DEFAULT_HISTOGRAM_BOUNDS: [f64; 13] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// A named metric and its aggregate
///
/// Each metric carries its own lock, so writers to different metrics never
/// contend with one another.
#[derive(Debug)]
pub struct Metric {
    name: String,
    kind: MetricKind,
    state: Mutex<MetricState>,
    started: Instant,
}

impl Metric {
    fn new(name: String, kind: MetricKind, state: MetricState, started: Instant) -> Self {
        Self {
            name,
            kind,
            state: Mutex::new(state),
            started,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Fold one sample into the aggregate
    ///
    /// Gauges take the value as their new reading; use [`Metric::add`] for
    /// relative changes.
    pub fn record(&self, value: impl Into<MetricValue>) -> MetricResult<()> {
        let value = value.into();
        let mut state = self.state.lock();

        match (&mut *state, value) {
            (MetricState::Rate(rate), MetricValue::Bool(b)) => rate.add(b),
            (MetricState::Rate(_), MetricValue::Number(_)) => return Err(self.mismatch(value)),
            (_, MetricValue::Bool(_)) => return Err(self.mismatch(value)),
            (_, MetricValue::Number(n)) if !n.is_finite() => {
                return Err(self.invalid(format!("{} is not finite", n)))
            }
            (MetricState::Counter(counter), MetricValue::Number(n)) => {
                if n < 0.0 {
                    return Err(self.invalid(format!("counters only increase, got {}", n)));
                }
                counter.add(n);
            }
            (MetricState::Gauge(gauge), MetricValue::Number(n)) => gauge.set(n),
            (MetricState::Trend(trend), MetricValue::Number(n)) => trend.add(n),
            (MetricState::Histogram(histogram), MetricValue::Number(n)) => histogram.add(n),
        }

        Ok(())
    }

    /// Increment a counter or move a gauge by `delta`
    pub fn add(&self, delta: f64) -> MetricResult<()> {
        match self.kind {
            MetricKind::Counter => self.record(delta),
            MetricKind::Gauge => {
                if !delta.is_finite() {
                    return Err(self.invalid(format!("{} is not finite", delta)));
                }
                if let MetricState::Gauge(gauge) = &mut *self.state.lock() {
                    gauge.add(delta);
                }
                Ok(())
            }
            _ => Err(self.mismatch(MetricValue::Number(delta))),
        }
    }

    /// Consistent point-in-time view of the aggregate
    pub fn snapshot(&self) -> MetricSnapshot {
        let aggregate = self.state.lock().summarize(self.started.elapsed());
        MetricSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            aggregate,
        }
    }

    /// Compute one statistic; `Ok(None)` when the metric has no samples yet
    pub fn statistic(&self, statistic: Statistic) -> MetricResult<Option<f64>> {
        let mut state = self.state.lock();

        let value = match (&mut *state, statistic) {
            (MetricState::Counter(c), Statistic::Count | Statistic::Sum) => {
                (c.samples > 0).then_some(c.sum)
            }
            (MetricState::Counter(c), Statistic::Rate) => {
                (c.samples > 0).then(|| c.per_second(self.started.elapsed()))
            }
            (MetricState::Gauge(g), Statistic::Value) => (g.samples > 0).then_some(g.value),
            (MetricState::Gauge(g), Statistic::Min) => (g.samples > 0).then_some(g.min),
            (MetricState::Gauge(g), Statistic::Max) => (g.samples > 0).then_some(g.max),
            (MetricState::Rate(r), Statistic::Rate) => r.rate(),
            (MetricState::Trend(t), Statistic::Percentile(p)) => t.percentile(p),
            (MetricState::Trend(t), Statistic::Med) => t.percentile(50.0),
            (MetricState::Trend(t), Statistic::Avg) => t.avg(),
            (MetricState::Trend(t), Statistic::Min) => t.min(),
            (MetricState::Trend(t), Statistic::Max) => t.max(),
            (MetricState::Trend(t), Statistic::Count) => (t.count() > 0).then(|| t.count() as f64),
            (MetricState::Trend(t), Statistic::Sum) => (t.count() > 0).then(|| t.sum()),
            (MetricState::Histogram(h), Statistic::Percentile(p)) => h.percentile(p),
            (MetricState::Histogram(h), Statistic::Med) => h.percentile(50.0),
            (MetricState::Histogram(h), Statistic::Avg) => h.avg(),
            (MetricState::Histogram(h), Statistic::Min) => h.min(),
            (MetricState::Histogram(h), Statistic::Max) => h.max(),
            (MetricState::Histogram(h), Statistic::Count) => {
                (h.count() > 0).then(|| h.count() as f64)
            }
            (MetricState::Histogram(h), Statistic::Sum) => (h.count() > 0).then(|| h.sum()),
            _ => {
                return Err(self.invalid(format!(
                    "statistic '{}' does not apply to a {}",
                    statistic, self.kind
                )))
            }
        };

        Ok(value)
    }

    fn mismatch(&self, value: MetricValue) -> MetricError {
        MetricError::TypeMismatch {
            name: self.name.clone(),
            kind: self.kind,
            value: value.to_string(),
        }
    }

    fn invalid(&self, reason: String) -> MetricError {
        MetricError::InvalidValue {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Snapshot of a single metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    #[serde(flatten)]
    pub aggregate: Aggregate,
}

/// Registry of all metrics of one run
///
/// The registry lock only guards the name lookup; recording goes through the
/// metric's own lock.
#[derive(Debug)]
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
    started: Instant,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Time since the registry was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Register a metric; registering an existing name returns the first one
    pub fn register(&self, name: &str, kind: MetricKind) -> Arc<Metric> {
        self.register_with(name, kind, || MetricState::new(kind))
    }

    /// Register a histogram with explicit, strictly increasing upper bounds
    pub fn register_histogram(&self, name: &str, bounds: &[f64]) -> MetricResult<Arc<Metric>> {
        if bounds.is_empty() {
            return Err(MetricError::InvalidBounds {
                name: name.to_string(),
                reason: "at least one bound is required".to_string(),
            });
        }
        if bounds.iter().any(|b| !b.is_finite()) || bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MetricError::InvalidBounds {
                name: name.to_string(),
                reason: "bounds must be finite and strictly increasing".to_string(),
            });
        }

        let bounds = bounds.to_vec();
        Ok(self.register_with(name, MetricKind::Histogram, || {
            MetricState::Histogram(HistogramState::new(bounds))
        }))
    }

    fn register_with(
        &self,
        name: &str,
        kind: MetricKind,
        state: impl FnOnce() -> MetricState,
    ) -> Arc<Metric> {
        if let Some(existing) = self.metrics.read().get(name) {
            return Self::keep_first(existing, kind);
        }

        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(name) {
            return Self::keep_first(existing, kind);
        }

        debug!("Registering {} metric '{}'", kind, name);
        let metric = Arc::new(Metric::new(name.to_string(), kind, state(), self.started));
        metrics.insert(name.to_string(), Arc::clone(&metric));
        metric
    }

    fn keep_first(existing: &Arc<Metric>, kind: MetricKind) -> Arc<Metric> {
        if existing.kind != kind {
            warn!(
                "Metric '{}' already registered as {}, ignoring re-registration as {}",
                existing.name, existing.kind, kind
            );
        }
        Arc::clone(existing)
    }

    /// Look up a metric by name
    pub fn get(&self, name: &str) -> Option<Arc<Metric>> {
        self.metrics.read().get(name).cloned()
    }

    fn require(&self, name: &str) -> MetricResult<Arc<Metric>> {
        self.get(name)
            .ok_or_else(|| MetricError::UnknownMetric(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.get(name).map(|metric| metric.kind)
    }

    /// Record a sample against a registered metric
    pub fn record(&self, name: &str, value: impl Into<MetricValue>) -> MetricResult<()> {
        self.require(name)?.record(value)
    }

    /// Increment a counter or move a gauge
    pub fn add(&self, name: &str, delta: f64) -> MetricResult<()> {
        self.require(name)?.add(delta)
    }

    pub fn snapshot(&self, name: &str) -> MetricResult<MetricSnapshot> {
        Ok(self.require(name)?.snapshot())
    }

    /// Snapshots of every metric, sorted by name
    pub fn snapshot_all(&self) -> Vec<MetricSnapshot> {
        let metrics: Vec<Arc<Metric>> = self.metrics.read().values().cloned().collect();
        let mut snapshots: Vec<MetricSnapshot> =
            metrics.iter().map(|metric| metric.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn statistic(&self, name: &str, statistic: Statistic) -> MetricResult<Option<f64>> {
        self.require(name)?.statistic(statistic)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
