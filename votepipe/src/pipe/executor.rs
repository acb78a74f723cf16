//! The pipe executor.
//!
//! A pipe owns an ordered list of tasks and runs them under one of four
//! [`Strategy`] values chosen per call. Pipes are assembled once and then
//! shared read-only between concurrent callers.

use super::{PipeConfig, Strategy};
use crate::cancellation::{BackgroundTasks, CancellationToken};
use crate::context::TaskContext;
use crate::errors::{MultiError, PipeError, PipeFailure, TaskError};
use crate::events::{EventSink, NoOpEventSink};
use crate::task::{Task, TaskRef};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome of one pipe execution.
pub type PipeResult<T> = Result<T, PipeFailure<T>>;

/// An ordered sequence of tasks plus the machinery to run them.
pub struct Pipe<T> {
    /// Tasks in the order they were enqueued.
    tasks: Vec<TaskRef<T>>,
    config: PipeConfig,
    /// Where replication work of blocking-only-first runs.
    background: Arc<BackgroundTasks>,
    event_sink: Arc<dyn EventSink>,
}

impl<T> Pipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty pipe with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipeConfig::default())
    }

    /// Creates an empty pipe with the given configuration.
    #[must_use]
    pub fn with_config(config: PipeConfig) -> Self {
        Self {
            tasks: Vec::new(),
            config,
            background: Arc::new(BackgroundTasks::new()),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the background registry used for detached replication.
    #[must_use]
    pub fn with_background(mut self, background: Arc<BackgroundTasks>) -> Self {
        self.background = background;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Appends a task and returns the pipe, for building in one expression.
    #[must_use]
    pub fn with_task(mut self, task: TaskRef<T>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Appends tasks in order. No deduplication, no reordering.
    pub fn enqueue(&mut self, tasks: impl IntoIterator<Item = TaskRef<T>>) {
        self.tasks.extend(tasks);
    }

    /// Appends a single task.
    pub fn push(&mut self, task: TaskRef<T>) {
        self.tasks.push(task);
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the pipe has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns the task names in order.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Returns the pipe configuration.
    #[must_use]
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Returns the background registry.
    #[must_use]
    pub fn background(&self) -> &Arc<BackgroundTasks> {
        &self.background
    }

    /// Runs the tasks against `input` using a strategy given by name.
    ///
    /// An unknown name fails before any task runs.
    pub async fn execute_named(&self, ctx: &TaskContext, strategy: &str, input: T) -> PipeResult<T> {
        match strategy.parse::<Strategy>() {
            Ok(strategy) => self.execute(ctx, strategy, input).await,
            Err(e) => {
                warn!(pipe = %self.config.name, strategy = %strategy, "Rejected unknown strategy");
                Err(PipeFailure::new(input, e))
            }
        }
    }

    /// Runs the tasks against `input` using `strategy`.
    pub async fn execute(&self, ctx: &TaskContext, strategy: Strategy, input: T) -> PipeResult<T> {
        let start = Instant::now();
        debug!(
            pipe = %self.config.name,
            strategy = %strategy,
            tasks = self.tasks.len(),
            run_id = %ctx.identity().run_id_str(),
            "Executing pipe"
        );
        self.emit(
            "pipe.started",
            json!({ "pipe": &self.config.name, "strategy": strategy.as_str(), "tasks": self.tasks.len() }),
        );

        let result = if ctx.is_cancelled() {
            Err(PipeFailure::new(input, PipeError::Cancelled(ctx.cancel_reason())))
        } else {
            match strategy {
                Strategy::Sequential => self.run_sequential(ctx, input).await,
                Strategy::Concurrent => self.run_concurrent(ctx, input).await,
                Strategy::SequentialWithFirstResult => self.run_first_result(ctx, input).await,
                Strategy::SequentialBlockingOnlyFirst => self.run_blocking_first(ctx, input).await,
            }
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => self.emit(
                "pipe.completed",
                json!({ "pipe": &self.config.name, "strategy": strategy.as_str(), "duration_ms": duration_ms }),
            ),
            Err(failure) => self.emit(
                "pipe.failed",
                json!({
                    "pipe": &self.config.name,
                    "strategy": strategy.as_str(),
                    "error": failure.error.to_string(),
                    "duration_ms": duration_ms,
                }),
            ),
        }
        result
    }

    /// Chain: each success feeds the next task, skips leave the value alone,
    /// the first failure aborts with the last good value.
    async fn run_sequential(&self, ctx: &TaskContext, input: T) -> PipeResult<T> {
        let mut value = input;
        for (index, task) in self.tasks.iter().enumerate() {
            match run_guarded(task.as_ref(), ctx, &value).await {
                None => return Err(self.cancelled(ctx, value)),
                Some(Ok(next)) => value = next,
                Some(Err(TaskError::Skip)) => self.note_skip(index, task.name()),
                Some(Err(source)) => {
                    self.note_failure(index, task.name(), &source);
                    return Err(PipeFailure::new(
                        value,
                        PipeError::Task {
                            index,
                            name: task.name().to_string(),
                            source,
                        },
                    ));
                }
            }
        }
        Ok(value)
    }

    /// Fan-out in batches against one shared input. Outputs are discarded;
    /// the first hard failure cancels the rest and is returned.
    async fn run_concurrent(&self, ctx: &TaskContext, input: T) -> PipeResult<T> {
        let batch_size = self.config.effective_batch_size();
        let fanout = ctx.child();
        let shared = Arc::new(input.clone());

        for (batch_no, batch) in self.tasks.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let mut workers = JoinSet::new();

            for (i, task) in batch.iter().enumerate() {
                let index = offset + i;
                let task = task.clone();
                let ctx = fanout.clone();
                let value = shared.clone();
                workers.spawn(async move { (index, task.run(&ctx, &value).await.map(|_| ())) });
            }

            loop {
                let joined = tokio::select! {
                    biased;
                    () = ctx.cancelled() => {
                        workers.abort_all();
                        return Err(self.cancelled(ctx, input));
                    }
                    joined = workers.join_next() => joined,
                };

                let error = match joined {
                    None => break,
                    Some(Ok((_, Ok(())))) => continue,
                    Some(Ok((index, Err(TaskError::Skip)))) => {
                        self.note_skip(index, self.tasks[index].name());
                        continue;
                    }
                    Some(Ok((index, Err(source)))) => {
                        let name = self.tasks[index].name();
                        self.note_failure(index, name, &source);
                        PipeError::Task {
                            index,
                            name: name.to_string(),
                            source,
                        }
                    }
                    Some(Err(join_error)) => PipeError::Join(join_error.to_string()),
                };

                fanout.cancel("fan-out aborted after task failure");
                workers.abort_all();
                return Err(PipeFailure::new(input, error));
            }
        }

        Ok(input)
    }

    /// Priority scan: the first success wins, skips are passed over, failures
    /// are collected and only reported if nothing succeeds.
    async fn run_first_result(&self, ctx: &TaskContext, input: T) -> PipeResult<T> {
        let mut errors = MultiError::new();
        for (index, task) in self.tasks.iter().enumerate() {
            match run_guarded(task.as_ref(), ctx, &input).await {
                None => return Err(self.cancelled(ctx, input)),
                Some(Ok(result)) => return Ok(result),
                Some(Err(TaskError::Skip)) => self.note_skip(index, task.name()),
                Some(Err(e)) => {
                    self.note_failure(index, task.name(), &e);
                    errors.push(e);
                }
            }
        }

        match errors.into_option() {
            None => Ok(input),
            Some(errors) => Err(PipeFailure::new(input, PipeError::Exhausted(errors))),
        }
    }

    /// Commit-then-replicate: tasks 1..n are handed to the background
    /// registry with a detached context, task 0 runs inline and decides the
    /// result.
    async fn run_blocking_first(&self, ctx: &TaskContext, input: T) -> PipeResult<T> {
        let Some((primary, replicas)) = self.tasks.split_first() else {
            return Ok(input);
        };

        let batch: Vec<_> = replicas
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let index = i + 1;
                let task = task.clone();
                let name = task.name().to_string();
                let value = input.clone();
                let identity = ctx.identity_arc().clone();
                let sink = self.event_sink.clone();
                let pipe_name = self.config.name.clone();

                let job = move |token: Arc<CancellationToken>| async move {
                    let detached = TaskContext::detached_with_token(&identity, token);
                    let result = task.run(&detached, &value).await.map(|_| ());
                    if let Err(ref e) = result {
                        if !e.is_skip() {
                            sink.try_emit(
                                "task.background_failed",
                                Some(json!({
                                    "pipe": pipe_name,
                                    "index": index,
                                    "task": task.name(),
                                    "error": e.to_string(),
                                })),
                            );
                        }
                    }
                    result
                };
                (name, job)
            })
            .collect();

        // Replicas are handed off together or not at all.
        if let Err(e) = self.background.spawn_all(batch) {
            return Err(PipeFailure::new(input, e));
        }

        match run_guarded(primary.as_ref(), ctx, &input).await {
            None => Err(self.cancelled(ctx, input)),
            Some(Ok(result)) => Ok(result),
            Some(Err(TaskError::Skip)) => {
                self.note_skip(0, primary.name());
                Ok(input)
            }
            Some(Err(source)) => {
                self.note_failure(0, primary.name(), &source);
                Err(PipeFailure::new(
                    input,
                    PipeError::Task {
                        index: 0,
                        name: primary.name().to_string(),
                        source,
                    },
                ))
            }
        }
    }

    fn cancelled(&self, ctx: &TaskContext, value: T) -> PipeFailure<T> {
        let reason = ctx.cancel_reason();
        debug!(pipe = %self.config.name, reason = %reason, "Pipe cancelled");
        PipeFailure::new(value, PipeError::Cancelled(reason))
    }

    fn note_skip(&self, index: usize, name: &str) {
        debug!(pipe = %self.config.name, index, task = %name, "Task skipped");
        self.emit("task.skipped", json!({ "pipe": &self.config.name, "index": index, "task": name }));
    }

    fn note_failure(&self, index: usize, name: &str, error: &TaskError) {
        warn!(pipe = %self.config.name, index, task = %name, error = %error, "Task failed");
        self.emit(
            "task.failed",
            json!({ "pipe": &self.config.name, "index": index, "task": name, "error": error.to_string() }),
        );
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.event_sink.try_emit(event_type, Some(data));
    }
}

impl<T> Default for Pipe<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("name", &self.config.name)
            .field("tasks", &self.tasks.len())
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

/// Runs a task unless the context is cancelled first. `None` means cancelled.
async fn run_guarded<T>(task: &dyn Task<T>, ctx: &TaskContext, input: &T) -> Option<Result<T, TaskError>>
where
    T: Send + Sync,
{
    tokio::select! {
        biased;
        () = ctx.cancelled() => None,
        result = task.run(ctx, input) => Some(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::task::task;

    fn add(name: &str, n: i32) -> TaskRef<i32> {
        task(name, move |_ctx, x: &i32| Ok(x + n))
    }

    fn fail(name: &str, message: &'static str) -> TaskRef<i32> {
        task(name, move |_ctx, _x: &i32| Err(TaskError::failed(message)))
    }

    fn skip(name: &str) -> TaskRef<i32> {
        task(name, |_ctx, _x: &i32| Err(TaskError::Skip))
    }

    #[tokio::test]
    async fn test_empty_pipe_returns_input_for_every_strategy() {
        let pipe: Pipe<i32> = Pipe::new();
        let ctx = TaskContext::new();
        for strategy in Strategy::ALL {
            assert_eq!(pipe.execute(&ctx, strategy, 9).await.unwrap(), 9);
        }
    }

    #[tokio::test]
    async fn test_sequential_failure_returns_last_good_value() {
        let mut pipe = Pipe::new();
        pipe.enqueue([add("plus1", 1), fail("broken", "boom"), add("plus100", 100)]);

        let failure = pipe
            .execute(&TaskContext::new(), Strategy::Sequential, 1)
            .await
            .unwrap_err();

        assert_eq!(failure.value, 2);
        assert!(matches!(failure.error, PipeError::Task { index: 1, ref name, .. } if name == "broken"));
    }

    #[tokio::test]
    async fn test_sequential_all_skip_returns_input() {
        let mut pipe = Pipe::new();
        pipe.enqueue([skip("a"), skip("b")]);

        let out = pipe.execute(&TaskContext::new(), Strategy::Sequential, 5).await.unwrap();
        assert_eq!(out, 5);
    }

    #[tokio::test]
    async fn test_first_result_joins_every_failure() {
        let mut pipe = Pipe::new();
        pipe.enqueue([fail("a", "first down"), skip("b"), fail("c", "second down")]);

        let failure = pipe
            .execute(&TaskContext::new(), Strategy::SequentialWithFirstResult, 3)
            .await
            .unwrap_err();

        assert_eq!(failure.value, 3);
        match failure.error {
            PipeError::Exhausted(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors.to_string(), "first down; second down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_first_result_failure_then_success() {
        let mut pipe = Pipe::new();
        pipe.enqueue([fail("a", "down"), task("triple", |_ctx, x: &i32| Ok(x * 3)), add("never", 1000)]);

        let out = pipe
            .execute(&TaskContext::new(), Strategy::SequentialWithFirstResult, 2)
            .await
            .unwrap();
        assert_eq!(out, 6);
    }

    #[tokio::test]
    async fn test_first_result_only_skips_is_not_an_error() {
        let mut pipe = Pipe::new();
        pipe.enqueue([skip("a"), skip("b")]);

        let out = pipe
            .execute(&TaskContext::new(), Strategy::SequentialWithFirstResult, 4)
            .await
            .unwrap();
        assert_eq!(out, 4);
    }

    #[tokio::test]
    async fn test_blocking_first_primary_error_propagates() {
        let mut pipe = Pipe::new();
        pipe.enqueue([fail("primary", "write rejected"), add("replica", 1)]);

        let failure = pipe
            .execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 1)
            .await
            .unwrap_err();
        assert_eq!(failure.value, 1);
        assert!(matches!(failure.error, PipeError::Task { index: 0, .. }));

        pipe.background().wait_idle().await;
    }

    #[tokio::test]
    async fn test_execute_named_rejects_unknown() {
        let pipe = Pipe::new().with_task(add("plus1", 1));
        let failure = pipe
            .execute_named(&TaskContext::new(), "PARALLEL", 1)
            .await
            .unwrap_err();

        assert_eq!(failure.value, 1);
        assert!(matches!(failure.error, PipeError::UnknownStrategy(ref s) if s == "PARALLEL"));

        let out = pipe.execute_named(&TaskContext::new(), "SEQUENTIAL", 1).await.unwrap();
        assert_eq!(out, 2);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut pipe = Pipe::with_config(PipeConfig::new().with_name("events"))
            .with_event_sink(sink.clone());
        pipe.enqueue([skip("a"), fail("b", "boom")]);

        let _ = pipe.execute(&TaskContext::new(), Strategy::Sequential, 0).await;

        let types: Vec<String> = sink.events().into_iter().map(|(t, _)| t).collect();
        assert_eq!(types, vec!["pipe.started", "task.skipped", "task.failed", "pipe.failed"]);
    }

    #[test]
    fn test_task_names_preserve_order() {
        let mut pipe = Pipe::new();
        pipe.enqueue([add("first", 1), add("second", 2)]);
        pipe.push(add("first", 1));

        assert_eq!(pipe.len(), 3);
        assert_eq!(pipe.task_names(), vec!["first", "second", "first"]);
        assert!(format!("{pipe:?}").contains("tasks: 3"));
    }
}
