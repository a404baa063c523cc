//! Resilience primitives for Stampede runs
//!
//! Currently this is the shutdown coordinator the run controller uses to stop
//! virtual users: a one-shot cancellation signal, tracking of live workers and
//! a bounded wait for them to drain.

pub mod shutdown;

pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownSignal, TaskGuard};
