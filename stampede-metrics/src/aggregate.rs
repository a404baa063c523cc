//! Per-kind sample accumulators and their summaries

use crate::types::MetricKind;
use serde::Serialize;
use std::time::Duration;

/// Running state of a metric; one variant per [`MetricKind`]
#[derive(Debug, Clone)]
pub(crate) enum MetricState {
    Counter(CounterState),
    Gauge(GaugeState),
    Rate(RateState),
    Trend(TrendState),
    Histogram(HistogramState),
}

impl MetricState {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricState::Counter(CounterState::default()),
            MetricKind::Gauge => MetricState::Gauge(GaugeState::default()),
            MetricKind::Rate => MetricState::Rate(RateState::default()),
            MetricKind::Trend => MetricState::Trend(TrendState::default()),
            MetricKind::Histogram => MetricState::Histogram(HistogramState::new(
                crate::registry::DEFAULT_HISTOGRAM_BOUNDS.to_vec(),
            )),
        }
    }

    pub(crate) fn summarize(&mut self, elapsed: Duration) -> Aggregate {
        match self {
            MetricState::Counter(state) => Aggregate::Counter(state.summary(elapsed)),
            MetricState::Gauge(state) => Aggregate::Gauge(state.summary()),
            MetricState::Rate(state) => Aggregate::Rate(state.summary()),
            MetricState::Trend(state) => Aggregate::Trend(state.summary()),
            MetricState::Histogram(state) => Aggregate::Histogram(state.summary()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CounterState {
    pub sum: f64,
    pub samples: u64,
}

impl CounterState {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.samples += 1;
    }

    /// Sum per second of run time
    pub fn per_second(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sum / secs
        } else {
            0.0
        }
    }

    fn summary(&self, elapsed: Duration) -> CounterSummary {
        CounterSummary {
            count: self.sum,
            rate: self.per_second(elapsed),
            samples: self.samples,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GaugeState {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub samples: u64,
}

impl GaugeState {
    pub fn set(&mut self, value: f64) {
        if self.samples == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.value = value;
        self.samples += 1;
    }

    pub fn add(&mut self, delta: f64) {
        let next = if self.samples == 0 { delta } else { self.value + delta };
        self.set(next);
    }

    fn summary(&self) -> GaugeSummary {
        GaugeSummary {
            value: self.value,
            min: self.min,
            max: self.max,
            samples: self.samples,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RateState {
    pub passes: u64,
    pub fails: u64,
}

impl RateState {
    pub fn add(&mut self, value: bool) {
        if value {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }

    fn summary(&self) -> RateSummary {
        RateSummary {
            rate: self.rate().unwrap_or(0.0),
            passes: self.passes,
            fails: self.fails,
        }
    }
}

/// Retains every sample so percentiles are exact
#[derive(Debug, Clone, Default)]
pub(crate) struct TrendState {
    samples: Vec<f64>,
    sorted: bool,
    sum: f64,
}

impl TrendState {
    pub fn add(&mut self, value: f64) {
        self.samples.push(value);
        self.sum += value;
        self.sorted = false;
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    fn sorted(&mut self) -> &[f64] {
        if !self.sorted {
            self.samples.sort_by(f64::total_cmp);
            self.sorted = true;
        }
        &self.samples
    }

    pub fn min(&mut self) -> Option<f64> {
        self.sorted().first().copied()
    }

    pub fn max(&mut self) -> Option<f64> {
        self.sorted().last().copied()
    }

    /// Linear interpolation between the closest ranks
    pub fn percentile(&mut self, p: f64) -> Option<f64> {
        let sorted = self.sorted();
        if sorted.is_empty() {
            return None;
        }

        let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = rank - lower as f64;

        Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
    }

    fn summary(&mut self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            sum: self.sum,
            avg: self.avg().unwrap_or(0.0),
            min: self.min().unwrap_or(0.0),
            max: self.max().unwrap_or(0.0),
            med: self.percentile(50.0).unwrap_or(0.0),
            p90: self.percentile(90.0).unwrap_or(0.0),
            p95: self.percentile(95.0).unwrap_or(0.0),
            p99: self.percentile(99.0).unwrap_or(0.0),
        }
    }
}

/// Fixed upper bounds plus an overflow bucket
#[derive(Debug, Clone)]
pub(crate) struct HistogramState {
    bounds: Vec<f64>,
    counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramState {
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = vec![0; bounds.len() + 1];
        Self {
            bounds,
            counts,
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        let index = self.bounds.partition_point(|bound| *bound < value);
        self.counts[index] += 1;

        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Interpolates inside the bucket holding the requested rank, so the
    /// error is at most that bucket's width
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }

        let rank = (p.clamp(0.0, 100.0) / 100.0) * self.count as f64;
        let mut seen = 0u64;

        for (index, &bucket_count) in self.counts.iter().enumerate() {
            if bucket_count == 0 {
                continue;
            }
            if (seen + bucket_count) as f64 >= rank {
                let lower = if index == 0 {
                    self.min
                } else {
                    self.bounds[index - 1].max(self.min)
                };
                let upper = self.bounds.get(index).copied().unwrap_or(self.max).min(self.max);
                let fraction = ((rank - seen as f64) / bucket_count as f64).clamp(0.0, 1.0);
                return Some(lower + (upper - lower) * fraction);
            }
            seen += bucket_count;
        }

        Some(self.max)
    }

    fn summary(&self) -> HistogramSummary {
        let buckets = self
            .counts
            .iter()
            .enumerate()
            .map(|(index, &count)| HistogramBucket {
                le: self.bounds.get(index).copied(),
                count,
            })
            .collect();

        HistogramSummary {
            count: self.count,
            sum: self.sum,
            avg: self.avg().unwrap_or(0.0),
            min: self.min().unwrap_or(0.0),
            max: self.max().unwrap_or(0.0),
            p50: self.percentile(50.0).unwrap_or(0.0),
            p90: self.percentile(90.0).unwrap_or(0.0),
            p95: self.percentile(95.0).unwrap_or(0.0),
            p99: self.percentile(99.0).unwrap_or(0.0),
            buckets,
        }
    }
}

/// Point-in-time aggregate of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Aggregate {
    Counter(CounterSummary),
    Gauge(GaugeSummary),
    Rate(RateSummary),
    Trend(TrendSummary),
    Histogram(HistogramSummary),
}

impl Aggregate {
    /// Whether at least one sample was recorded
    pub fn has_data(&self) -> bool {
        match self {
            Aggregate::Counter(s) => s.samples > 0,
            Aggregate::Gauge(s) => s.samples > 0,
            Aggregate::Rate(s) => s.passes + s.fails > 0,
            Aggregate::Trend(s) => s.count > 0,
            Aggregate::Histogram(s) => s.count > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSummary {
    /// Sum of all reported values
    pub count: f64,
    /// `count` per second of run time
    pub rate: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeSummary {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSummary {
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub buckets: Vec<HistogramBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound; `None` for the overflow bucket
    pub le: Option<f64>,
    pub count: u64,
}
