//! Error types for votepipe.
//!
//! The taxonomy has three tiers: [`TaskError`] is what a single task reports,
//! [`PipeError`] is what a pipe reports after applying its strategy, and
//! [`VoteError`] is what the use-case layer hands back to callers.

use crate::registry::Operation;
use std::fmt;
use thiserror::Error;

/// Error returned by a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task had nothing to contribute. Not a failure.
    #[error("task skipped: no contribution")]
    Skip,

    /// The task observed its context being cancelled.
    #[error("task cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// A backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A plain failure with a message.
    #[error("{0}")]
    Failed(String),

    /// Any other error raised by caller-supplied task code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Creates a failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true if this is the skip signal.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Ordered aggregate of task failures.
///
/// Collected by first-result scans so that no attempt's failure is lost.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<TaskError>,
}

impl MultiError {
    /// Creates an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error.
    pub fn push(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    /// Returns the number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the collected errors in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    /// Iterates over the collected errors.
    pub fn iter(&self) -> impl Iterator<Item = &TaskError> {
        self.errors.iter()
    }

    /// Returns `None` when empty, the aggregate otherwise.
    #[must_use]
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<TaskError> for MultiError {
    fn from_iter<I: IntoIterator<Item = TaskError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

/// Error produced by a pipe execution.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The strategy name is not one of the known literals.
    #[error("unknown execution strategy: '{0}'")]
    UnknownStrategy(String),

    /// A task failed and the strategy aborted.
    #[error("task #{index} ({name}) failed: {source}")]
    Task {
        /// Position of the task in the pipe.
        index: usize,
        /// Name of the task.
        name: String,
        /// The task error.
        #[source]
        source: TaskError,
    },

    /// No task succeeded and at least one failed.
    #[error("every task failed: {0}")]
    Exhausted(MultiError),

    /// The caller's context was cancelled.
    #[error("pipe cancelled: {0}")]
    Cancelled(String),

    /// A concurrent worker panicked or was aborted.
    #[error("worker join error: {0}")]
    Join(String),

    /// The background registry no longer accepts work.
    #[error("background task registry is shutting down")]
    ShuttingDown,
}

impl PipeError {
    /// Returns the task error behind a [`PipeError::Task`], if any.
    #[must_use]
    pub const fn task_error(&self) -> Option<&TaskError> {
        match self {
            Self::Task { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A failed execution together with the value the pipe settled on.
///
/// For sequential chains the value is the last successful output; for
/// every other strategy it is the original input.
#[derive(Debug)]
pub struct PipeFailure<T> {
    /// The value at the point of failure.
    pub value: T,
    /// What went wrong.
    pub error: PipeError,
}

impl<T> PipeFailure<T> {
    /// Creates a new failure.
    #[must_use]
    pub const fn new(value: T, error: PipeError) -> Self {
        Self { value, error }
    }

    /// Splits into value and error.
    pub fn into_parts(self) -> (T, PipeError) {
        (self.value, self.error)
    }

    /// Drops the value and keeps the error.
    pub fn into_error(self) -> PipeError {
        self.error
    }
}

impl<T> fmt::Display for PipeFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<T: fmt::Debug> std::error::Error for PipeFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Error raised while building or querying an operation registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No pipe is registered for the operation.
    #[error("no pipeline registered for operation {0}")]
    Unregistered(Operation),

    /// The operation was registered twice.
    #[error("operation {0} is already registered")]
    Duplicate(Operation),

    /// The name does not match any operation.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
}

/// Error raised by a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store '{0}' unavailable")]
    Unavailable(String),

    /// The store rejected or failed the request.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Error returned by the vote use cases.
#[derive(Debug, Error)]
pub enum VoteError {
    /// Dispatch failed before any pipe ran.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The pipe ran and failed.
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// The pipe produced a result of the wrong shape.
    #[error("operation {operation} produced an unexpected result: {found}")]
    UnexpectedResult {
        /// The operation that was dispatched.
        operation: Operation,
        /// Description of what was found.
        found: String,
    },

    /// The vote failed validation.
    #[error("invalid vote: {0}")]
    InvalidVote(String),
}

impl<T> From<PipeFailure<T>> for VoteError {
    fn from(failure: PipeFailure<T>) -> Self {
        Self::Pipe(failure.error)
    }
}
