//! Graceful shutdown coordination
//!
//! A run stops in two phases: a graceful signal tells workers to finish the
//! iteration they are in and start no new one, and if they have not drained
//! when the grace period expires a forced signal follows and the remaining
//! workers are abandoned.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Shutdown signal types with escalating urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Finish the current iteration, then stop
    Graceful,
    /// Grace period expired; remaining work is abandoned
    Forced,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Forced => write!(f, "forced"),
        }
    }
}

/// Graceful shutdown coordinator
///
/// Late subscribers still observe a signal sent before they subscribed.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<Option<ShutdownSignal>>,
    is_shutting_down: AtomicBool,
    active_tasks: AtomicU32,
    drained: Notify,
    graceful_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with the default 30s grace period
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new shutdown coordinator with a custom grace period
    pub fn with_timeout(graceful_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(None);

        Self {
            sender,
            is_shutting_down: AtomicBool::new(false),
            active_tasks: AtomicU32::new(0),
            drained: Notify::new(),
            graceful_timeout,
        }
    }

    pub fn graceful_timeout(&self) -> Duration {
        self.graceful_timeout
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownSignal>> {
        self.sender.subscribe()
    }

    /// Check if shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Acquire)
    }

    /// Broadcast the graceful signal; returns false if shutdown had already begun
    pub fn signal(&self) -> bool {
        if self.is_shutting_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("Shutdown requested, draining {} active tasks", self.active_task_count());
        self.sender.send_replace(Some(ShutdownSignal::Graceful));
        true
    }

    /// Resolves once shutdown has begun
    pub async fn cancelled(&self) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this only errors if it is dropped mid-wait
        let _ = receiver.wait_for(Option::is_some).await;
    }

    /// Register a live task; the count drops when the guard is dropped
    pub fn task_started(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            coordinator: Arc::clone(self),
        }
    }

    fn task_completed(&self) {
        let previous = self
            .active_tasks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    /// Get current active task count
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Wait until no task is active, up to `timeout`; true if fully drained
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.drained.notified();
            if self.active_task_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.active_task_count() == 0;
            }
        }
    }

    /// Signal graceful shutdown and wait out the grace period
    ///
    /// On expiry the forced signal is broadcast and the number of tasks still
    /// alive is reported; the caller owns them and decides how to abort.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        if !self.signal() {
            return Err(ShutdownError::AlreadyShuttingDown);
        }

        if self.wait_for_drain(self.graceful_timeout).await {
            info!("Graceful shutdown completed");
            return Ok(());
        }

        Err(ShutdownError::TasksRemaining(self.force()))
    }

    /// Broadcast the forced signal; returns the number of tasks still active
    pub fn force(&self) -> u32 {
        self.is_shutting_down.store(true, Ordering::Release);
        let remaining = self.active_task_count();
        warn!(
            "Graceful shutdown timed out after {:?}, forcing {} remaining tasks",
            self.graceful_timeout, remaining
        );
        self.sender.send_replace(Some(ShutdownSignal::Forced));
        remaining
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks a task as live for as long as it is held
#[derive(Debug)]
pub struct TaskGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.coordinator.task_completed();
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// Shutdown already in progress
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,

    /// Tasks still alive when the grace period ran out
    #[error("Grace period expired with {0} tasks still active")]
    TasksRemaining(u32),
}
