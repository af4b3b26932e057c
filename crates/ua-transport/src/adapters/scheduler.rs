//! Tokio-backed retry scheduler.

use crate::domain::SetupError;
use crate::ports::{ScheduledTask, Scheduler};
use std::time::Duration;
use tokio::runtime::Handle;

/// Runs scheduled tasks on a Tokio runtime after a `tokio::time::sleep`.
///
/// One instance can be shared (behind an `Arc`) by every transport in the
/// process. Tasks still sleeping when the runtime shuts down are dropped,
/// which the transport reports as `SchedulerUnavailable`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the current runtime.
    pub fn current() -> Result<Self, SetupError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SetupError::NoRuntime(e.to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }
}
