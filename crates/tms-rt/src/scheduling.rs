//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Runtime helpers supporting the scheduler."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error};

/// Async rate limiter with a period that can be changed while running.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Interval,
    period: Duration,
}

impl RateLimiter {
    /// First tick completes immediately, then every `period`.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    /// First tick completes after `delay`, then every `period`.
    pub fn starting_after(delay: Duration, period: Duration) -> Self {
        Self::starting_at(Instant::now() + delay, period)
    }

    fn starting_at(start: Instant, period: Duration) -> Self {
        let period = period.max(Duration::from_nanos(1));
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Switch to `period`, even when it equals the current one. The next
    /// tick fires immediately and the following ones are spaced by `period`.
    pub fn set_period(&mut self, period: Duration) {
        if period != self.period {
            debug!(
                old_ms = self.period.as_millis() as u64,
                new_ms = period.as_millis() as u64,
                "rate limiter period changed"
            );
        }
        *self = Self::starting_at(Instant::now(), period);
    }
}

/// Named group of periodic tasks sharing one shutdown signal.
#[derive(Debug)]
pub struct TaskGroup {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(4);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Spawn a task that receives its own shutdown receiver.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown.subscribe()));
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every task to stop and wait for all of them.
    ///
    /// Returns the first task error in spawn order; the remaining tasks are
    /// still joined.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        let mut first_error = None;
        for (name, handle) in self.tasks {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("task {} join failure: {}", name, err)),
            };
            if let Err(err) = outcome {
                error!(task = name, error = %err, "periodic task ended with error");
                first_error.get_or_insert(err);
            } else {
                debug!(task = name, "periodic task stopped");
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
