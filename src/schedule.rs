// src/schedule.rs
//! Cancelable recurring and delayed tasks on the tokio runtime.
//!
//! A `ScheduledTask` owns its `JoinHandle`; `cancel()` or dropping the task
//! aborts it, so a torn-down session never leaks recurring work.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub struct ScheduledTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicU64>,
}

impl ScheduledTask {
    /// Run `job` every `period`, first run one period from now.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        // A zero period would make `interval_at` panic.
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
                counter.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(target: "schedule", task = name, "tick");
            }
        });
        Self {
            name,
            handle: Some(handle),
            fired,
        }
    }

    /// Run `job` once after `delay`.
    pub fn after<Fut>(name: &'static str, delay: Duration, job: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            job.await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Self {
            name,
            handle: Some(handle),
            fired,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Completed runs so far.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the task. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
            tracing::debug!(target: "schedule", task = self.name, "cancelled");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .field("fired", &self.fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_every_period_until_cancelled() {
        let mut task = ScheduledTask::every("test", Duration::from_secs(60), || async {});
        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(task.fired(), 0);

        time::sleep(Duration::from_secs(122)).await;
        assert_eq!(task.fired(), 3);

        task.cancel();
        assert!(!task.is_active());
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(task.fired(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_runs_once() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after("once", Duration::from_millis(1500), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(task.fired(), 1);
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        let task = ScheduledTask::every("dropped", Duration::from_secs(1), move || {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(task);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
