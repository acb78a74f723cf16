//! Task trait and closure adapters.
//!
//! Tasks are the units of work a [`Pipe`](crate::pipe::Pipe) runs. The engine
//! never looks inside a task; it only sees the returned value or error.

use crate::context::TaskContext;
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A unit of work over values of type `T`.
///
/// The input is borrowed: a task never mutates the value it is handed and
/// returns a new one instead. Return [`TaskError::Skip`] to signal "nothing
/// to contribute".
#[async_trait]
pub trait Task<T>: Send + Sync + Debug {
    /// Returns the name of the task, used in logs and errors.
    fn name(&self) -> &str;

    /// Runs the task.
    async fn run(&self, ctx: &TaskContext, input: &T) -> Result<T, TaskError>;
}

/// Shared handle to a task. One task may sit in several pipes.
pub type TaskRef<T> = Arc<dyn Task<T>>;

/// A task backed by a synchronous closure.
pub struct FnTask<F> {
    name: String,
    func: F,
}

impl<F> FnTask<F> {
    /// Creates a new function-based task.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTask<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<T, F> Task<T> for FnTask<F>
where
    T: Send + Sync,
    F: Fn(&TaskContext, &T) -> Result<T, TaskError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext, input: &T) -> Result<T, TaskError> {
        (self.func)(ctx, input)
    }
}

/// A task backed by an async closure.
///
/// The closure receives an owned copy of the context and the input.
pub struct AsyncFnTask<F, Fut> {
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnTask<F, Fut> {
    /// Creates a new async function-based task.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnTask<F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTask")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<T, F, Fut> Task<T> for AsyncFnTask<F, Fut>
where
    T: Clone + Send + Sync,
    F: Fn(TaskContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TaskError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext, input: &T) -> Result<T, TaskError> {
        (self.func)(ctx.clone(), input.clone()).await
    }
}

/// Wraps a synchronous closure into a shared task.
pub fn task<T, F>(name: impl Into<String>, func: F) -> TaskRef<T>
where
    T: Send + Sync + 'static,
    F: Fn(&TaskContext, &T) -> Result<T, TaskError> + Send + Sync + 'static,
{
    Arc::new(FnTask::new(name, func))
}

/// Wraps an async closure into a shared task.
pub fn async_task<T, F, Fut>(name: impl Into<String>, func: F) -> TaskRef<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(TaskContext, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    Arc::new(AsyncFnTask::new(name, func))
}
