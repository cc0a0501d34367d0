//! Periodic timers. Every scheduled task is owned by a `ScheduledTask`, dropping it cancels the task.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug)]
pub struct ScheduledTask {
    label: String,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            trace!("Cancelling scheduled task '{}'.", self.label);
        }
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs `task` once per `period`, the first time one period from now.
/// A run that takes too long delays the following ones instead of bunching them up.
pub fn every<F, Fut>(label: impl Into<String>, period: Duration, mut task: F) -> ScheduledTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let label = label.into();
    let period = period.max(Duration::from_millis(1)); // tokio panics on a zero period.
    trace!("Scheduling '{}' every {:?}.", label, period);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // completes immediately.
        loop {
            interval.tick().await;
            task().await;
        }
    });
    ScheduledTask { label, handle }
}
