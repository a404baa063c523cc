//! Run profile: stages, thresholds and run timing

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use stampede_config::{RunConfig, StageConfig};
use stampede_metrics::Threshold;
use std::time::Duration;

/// A timed segment ramping linearly to `target` concurrent virtual users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

impl From<&StageConfig> for Stage {
    fn from(config: &StageConfig) -> Self {
        Self::new(config.duration, config.target)
    }
}

/// Everything the controller needs to know about a run, fixed before it starts
#[derive(Debug, Clone)]
pub struct RunProfile {
    pub name: String,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<Threshold>,
    /// Base seed for every VU's random source; drawn at run start when absent
    pub seed: Option<u64>,
    pub tick_interval: Duration,
    pub graceful_stop: Duration,
    pub threshold_check_interval: Duration,
}

impl RunProfile {
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        let defaults = RunConfig::default();
        Self {
            name: name.into(),
            stages,
            thresholds: Vec::new(),
            seed: None,
            tick_interval: defaults.tick_interval,
            graceful_stop: defaults.graceful_stop,
            threshold_check_interval: defaults.threshold_check_interval,
        }
    }

    /// Build a profile from configuration, parsing every threshold expression
    pub fn from_config(config: &RunConfig) -> EngineResult<Self> {
        let mut thresholds = Vec::new();
        for (metric, entries) in &config.thresholds {
            for entry in entries {
                let mut threshold = Threshold::parse(metric.as_str(), entry.expression())?;
                if entry.abort_on_fail() {
                    threshold =
                        threshold.abort_on_fail(entry.delay_abort_eval().unwrap_or_default());
                }
                thresholds.push(threshold);
            }
        }

        Ok(Self {
            name: config.name.clone(),
            stages: config.stages.iter().map(Stage::from).collect(),
            thresholds,
            seed: config.seed,
            tick_interval: config.tick_interval,
            graceful_stop: config.graceful_stop,
            threshold_check_interval: config.threshold_check_interval,
        })
    }

    pub fn with_threshold(mut self, metric: &str, expression: &str) -> EngineResult<Self> {
        self.thresholds.push(Threshold::parse(metric, expression)?);
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// Checks that do not depend on the workflow or the registry
    pub fn validate(&self) -> EngineResult<()> {
        if self.stages.is_empty() {
            return Err(EngineError::EmptyStages);
        }
        if self.total_duration().is_zero() {
            return Err(EngineError::InvalidProfile(
                "stages must span a non-zero total duration".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(EngineError::InvalidProfile(
                "tick_interval must be positive".to_string(),
            ));
        }
        if self.threshold_check_interval.is_zero() {
            return Err(EngineError::InvalidProfile(
                "threshold_check_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
