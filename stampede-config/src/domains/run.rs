//! Run profile configuration: stages, thresholds and run timing

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Run profile configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run name used in logs and reports
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Ordered ramp stages; empty means "use the scenario's own profile"
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Threshold expressions keyed by metric name
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdConfig>>,

    /// Seed for the per-VU random sources; random when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// How often the controller reconciles the VU population
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Grace period for in-flight iterations once the run stops
    #[serde(with = "humantime_serde", default = "default_graceful_stop")]
    pub graceful_stop: Duration,

    /// How often abort-on-fail thresholds are checked during the run
    #[serde(with = "humantime_serde", default = "default_threshold_check_interval")]
    pub threshold_check_interval: Duration,
}

/// A single ramp stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Time to reach `target` from the previous stage's target
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Concurrent virtual users at the end of the stage
    pub target: u64,
}

/// Threshold definition, either a bare expression or the detailed form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    /// `"p(95)<500"`
    Expression(String),

    /// `{ threshold: "rate<0.1", abort_on_fail: true, delay_abort_eval: "10s" }`
    Detailed {
        threshold: String,
        #[serde(default)]
        abort_on_fail: bool,
        #[serde(
            default,
            with = "humantime_serde",
            skip_serializing_if = "Option::is_none"
        )]
        delay_abort_eval: Option<Duration>,
    },
}

impl ThresholdConfig {
    /// The raw threshold expression
    pub fn expression(&self) -> &str {
        match self {
            ThresholdConfig::Expression(expr) => expr,
            ThresholdConfig::Detailed { threshold, .. } => threshold,
        }
    }

    /// Whether a violation during the run should stop it early
    pub fn abort_on_fail(&self) -> bool {
        match self {
            ThresholdConfig::Expression(_) => false,
            ThresholdConfig::Detailed { abort_on_fail, .. } => *abort_on_fail,
        }
    }

    /// Minimum elapsed run time before abort evaluation kicks in
    pub fn delay_abort_eval(&self) -> Option<Duration> {
        match self {
            ThresholdConfig::Expression(_) => None,
            ThresholdConfig::Detailed {
                delay_abort_eval, ..
            } => *delay_abort_eval,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            stages: Vec::new(),
            thresholds: BTreeMap::new(),
            seed: None,
            tick_interval: default_tick_interval(),
            graceful_stop: default_graceful_stop(),
            threshold_check_interval: default_threshold_check_interval(),
        }
    }
}

impl RunConfig {
    /// Example profile used by `generate_sample`
    pub fn sample() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "http_req_duration".to_string(),
            vec![
                ThresholdConfig::Expression("p(95)<500".to_string()),
                ThresholdConfig::Expression("p(99)<1000".to_string()),
            ],
        );
        thresholds.insert(
            "http_req_failed".to_string(),
            vec![ThresholdConfig::Detailed {
                threshold: "rate<0.1".to_string(),
                abort_on_fail: true,
                delay_abort_eval: Some(Duration::from_secs(30)),
            }],
        );

        Self {
            stages: vec![
                StageConfig {
                    duration: Duration::from_secs(30),
                    target: 10,
                },
                StageConfig {
                    duration: Duration::from_secs(60),
                    target: 10,
                },
                StageConfig {
                    duration: Duration::from_secs(30),
                    target: 0,
                },
            ],
            thresholds,
            ..Default::default()
        }
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }
}

impl Validatable for RunConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.name, "name", self.domain_name())?;

        validate_positive(
            self.tick_interval.as_millis(),
            "tick_interval",
            self.domain_name(),
        )?;

        validate_positive(
            self.threshold_check_interval.as_millis(),
            "threshold_check_interval",
            self.domain_name(),
        )?;

        if !self.stages.is_empty() && self.total_duration().is_zero() {
            return Err(self.validation_error("stages must span a non-zero total duration"));
        }

        for (metric, thresholds) in &self.thresholds {
            validate_required_string(metric, "threshold metric name", self.domain_name())?;
            for threshold in thresholds {
                validate_required_string(
                    threshold.expression(),
                    &format!("threshold expression for '{}'", metric),
                    self.domain_name(),
                )?;
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "run"
    }
}

// Default value functions
fn default_run_name() -> String {
    "stampede".to_string()
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_graceful_stop() -> Duration {
    Duration::from_secs(30)
}

fn default_threshold_check_interval() -> Duration {
    Duration::from_secs(5)
}
