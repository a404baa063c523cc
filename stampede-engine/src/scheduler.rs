//! Stage scheduler: target concurrency as a function of elapsed time

use crate::error::{EngineError, EngineResult};
use crate::profile::Stage;
use std::time::Duration;

/// Maps elapsed run time to the number of virtual users that should be live
///
/// Each stage ramps linearly from the previous stage's target (0 for the
/// first) to its own target. The scheduler holds no mutable state.
#[derive(Debug, Clone)]
pub struct StageScheduler {
    stages: Vec<Stage>,
    total: Duration,
}

impl StageScheduler {
    pub fn new(stages: Vec<Stage>) -> EngineResult<Self> {
        if stages.is_empty() {
            return Err(EngineError::EmptyStages);
        }
        let total = stages.iter().map(|stage| stage.duration).sum();
        Ok(Self { stages, total })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.total
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|stage| stage.target).max().unwrap_or(0)
    }

    /// Index of the stage running at `elapsed`; `None` once the run is over
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return Some(index);
            }
        }
        None
    }

    /// `round(start + (end - start) * progress)` within the current stage
    ///
    /// Zero-length stages snap straight to their target; past the last stage
    /// the final target is returned.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut start_target = 0u64;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let start = start_target as f64;
                let end = stage.target as f64;
                return (start + (end - start) * progress).round() as u64;
            }
            start_target = stage.target;
            stage_start = stage_end;
        }

        start_target
    }
}
