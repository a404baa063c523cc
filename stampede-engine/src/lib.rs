//! Load generation engine for Stampede
//!
//! The [`RunController`] drives a run: it asks the [`StageScheduler`] how
//! many virtual users should be live, spawns or retires workers to match,
//! and each worker repeatedly runs a [`Workflow`] through the
//! [`WorkflowExecutor`]. Every sample lands in the run's
//! [`MetricRegistry`](stampede_metrics::MetricRegistry); when the run ends
//! the thresholds are evaluated into a [`RunReport`].

pub mod context;
pub mod controller;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod scheduler;
pub mod vu;
pub mod workflow;

// Re-export main types for convenience
pub use context::IterationContext;
pub use controller::{RunController, RunHandle};
pub use error::{EngineError, EngineResult};
pub use executor::{IterationOutcome, WorkflowExecutor};
pub use metrics::BuiltinMetrics;
pub use profile::{RunProfile, Stage};
pub use report::{RunReport, StopReason, Verdict};
pub use scheduler::StageScheduler;
pub use vu::{VirtualUser, VuState};
pub use workflow::{
    BranchStep, CheckStep, ExtractStep, GroupStep, MetricAction, MetricStep, RepeatStep,
    RequestStep, SleepStep, Step, WhenStep, Workflow,
};
