//! Task fixtures.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::TaskContext;
use crate::errors::TaskError;
use crate::task::Task;

/// A task that returns its input unchanged and counts its runs.
#[derive(Debug)]
pub struct CountingTask {
    name: String,
    runs: AtomicUsize,
}

impl CountingTask {
    /// Creates a counting task.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the task ran.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Resets the run counter.
    pub fn reset(&self) {
        self.runs.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T> Task<T> for CountingTask
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext, input: &T) -> Result<T, TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(input.clone())
    }
}

/// A task that sleeps before returning its input.
///
/// Gives up with [`TaskError::Cancelled`] if its context is cancelled while
/// sleeping.
#[derive(Debug)]
pub struct SlowTask {
    name: String,
    delay: Duration,
    finished: AtomicUsize,
}

impl SlowTask {
    /// Creates a slow task.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            finished: AtomicUsize::new(0),
        }
    }

    /// Creates a slow task with a delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Returns how many runs slept to completion.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T> Task<T> for SlowTask
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext, input: &T) -> Result<T, TaskError> {
        tokio::select! {
            () = ctx.cancelled() => Err(TaskError::Cancelled { reason: ctx.cancel_reason() }),
            () = tokio::time::sleep(self.delay) => {
                self.finished.fetch_add(1, Ordering::SeqCst);
                Ok(input.clone())
            }
        }
    }
}
