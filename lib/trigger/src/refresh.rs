//! Recurring job scheduling for cache refresh.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A job run on every tick of a recurring schedule.
pub type RecurringJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a scheduled recurring job.
///
/// Cancelling is idempotent; a cancelled job never runs again.
#[derive(Debug, Clone)]
pub struct JobHandle {
    token: CancellationToken,
}

impl JobHandle {
    /// Wraps a cancellation token.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Cancels the job.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns whether the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Runs jobs on a fixed schedule.
pub trait JobScheduler: Send + Sync {
    /// Runs `job` after `initial_delay`, then every `interval`, until the
    /// returned handle is cancelled.
    fn schedule_recurring(
        &self,
        name: &str,
        job: RecurringJob,
        initial_delay: Duration,
        interval: Duration,
    ) -> JobHandle;
}

/// Schedules jobs as tokio tasks.
///
/// The next run starts `interval` after the previous one finished, so runs
/// never overlap.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl JobScheduler for TokioScheduler {
    fn schedule_recurring(
        &self,
        name: &str,
        job: RecurringJob,
        initial_delay: Duration,
        interval: Duration,
    ) -> JobHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                debug!(job = %name, "running scheduled job");
                job().await;
                delay = interval;
            }
            debug!(job = %name, "scheduled job cancelled");
        });

        JobHandle::new(token)
    }
}
