//! Cancellable periodic tasks.
//!
//! Every timer in the pipeline runs through [`PeriodicTask`]. It is driven by
//! `tokio::time`, so tests pause the clock and advance it instead of sleeping.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// A background task that runs a closure every `period`.
///
/// The first run happens one full period after spawning. A run that overruns
/// the period delays the next one rather than bursting. Dropping the handle
/// cancels the task.
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics if `period` is zero or if called outside a Tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let start = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                task().await;
            }
        });
        debug!(task = name, ?period, "periodic task started");
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task. Idempotent.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            self.handle.abort();
            debug!(task = self.name, "periodic task cancelled");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
