//! Lifecycle registry for detached background work.

use super::CancellationToken;
use crate::errors::{PipeError, TaskError};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for background task draining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// How long `shutdown` waits for running tasks before aborting them.
    pub drain_timeout_ms: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5000,
        }
    }
}

impl BackgroundConfig {
    /// Creates a new background config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the drain timeout.
    #[must_use]
    pub fn with_drain_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.drain_timeout_ms = timeout_ms;
        self
    }

    /// Returns the drain timeout as a duration.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Outcome of a shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that finished before the deadline.
    pub completed: usize,
    /// Tasks aborted at the deadline.
    pub aborted: usize,
    /// Tasks that panicked.
    pub panicked: usize,
}

/// Registry of detached tasks that outlive the request that started them.
///
/// Tasks spawned here are insulated from the caller's cancellation but share
/// one shutdown token, so the owning process can cancel and drain them.
pub struct BackgroundTasks {
    /// Cancelled on shutdown; handed to every detached task.
    shutdown_token: Arc<CancellationToken>,
    /// Handles to spawned tasks.
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    /// Set once shutdown starts.
    closed: AtomicBool,
    /// Number of tasks that ended with a non-skip error.
    failures: Arc<AtomicUsize>,
    config: BackgroundConfig,
}

impl BackgroundTasks {
    /// Creates a new registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BackgroundConfig::default())
    }

    /// Creates a registry with the given configuration.
    #[must_use]
    pub fn with_config(config: BackgroundConfig) -> Self {
        Self {
            shutdown_token: Arc::new(CancellationToken::new()),
            handles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            failures: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Returns the token detached tasks observe.
    #[must_use]
    pub fn shutdown_token(&self) -> &Arc<CancellationToken> {
        &self.shutdown_token
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Spawns a detached task.
    ///
    /// The task's error is logged and counted, never propagated.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::ShuttingDown`] once shutdown has started.
    pub fn spawn<F, Fut>(&self, name: &str, task: F) -> Result<(), PipeError>
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.spawn_all([(name.to_string(), task)]).map(|_| ())
    }

    /// Spawns every task or none of them.
    ///
    /// The closed check and the spawns happen under one lock, so a shutdown
    /// starting concurrently either sees all of them to drain or rejects
    /// the whole batch.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::ShuttingDown`] once shutdown has started.
    pub fn spawn_all<I, F, Fut>(&self, tasks: I) -> Result<usize, PipeError>
    where
        I: IntoIterator<Item = (String, F)>,
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let mut handles = self.handles.lock();
        if self.is_closed() {
            return Err(PipeError::ShuttingDown);
        }
        handles.retain(|(_, h)| !h.is_finished());

        let mut spawned = 0;
        for (name, task) in tasks {
            let token = self.shutdown_token.clone();
            let failures = self.failures.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                match task(token).await {
                    Ok(()) | Err(TaskError::Skip) => {
                        debug!(task = %task_name, "Background task finished");
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::SeqCst);
                        warn!(task = %task_name, error = %e, "Background task failed");
                    }
                }
            });
            handles.push((name, handle));
            spawned += 1;
        }
        Ok(spawned)
    }

    /// Returns the number of tasks that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .count()
    }

    /// Returns how many background tasks failed so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Waits until every registered task has finished, including tasks
    /// spawned while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            let mut active: FuturesUnordered<_> = handles
                .into_iter()
                .map(|(name, handle)| async move { (name, handle.await) })
                .collect();
            while let Some((name, joined)) = active.next().await {
                if let Err(e) = joined {
                    warn!(task = %name, "Background task join error: {}", e);
                }
            }
        }
    }

    /// Stops accepting work, cancels the shutdown token and drains with the
    /// configured timeout.
    pub async fn shutdown(&self) -> DrainReport {
        self.shutdown_with_timeout(self.config.drain_timeout()).await
    }

    /// Stops accepting work, cancels the shutdown token and drains.
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> DrainReport {
        {
            let _handles = self.handles.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.shutdown_token.cancel("background registry shutting down");

        let deadline = Instant::now() + timeout;
        let mut report = DrainReport::default();

        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                break;
            }
            info!(count = handles.len(), "Draining background tasks");

            for (name, mut handle) in handles {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => report.completed += 1,
                    Ok(Err(e)) => {
                        warn!(task = %name, "Background task join error: {}", e);
                        report.panicked += 1;
                    }
                    Err(_) => {
                        warn!(task = %name, "Background task did not finish before deadline");
                        handle.abort();
                        report.aborted += 1;
                    }
                }
            }
        }

        report
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("pending", &self.pending())
            .field("failures", &self.failures())
            .field("closed", &self.is_closed())
            .finish()
    }
}
