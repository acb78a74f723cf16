//! Execution strategies and pipe configuration.

use crate::errors::PipeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of tasks a concurrent fan-out runs at once.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// How a pipe runs its tasks.
///
/// Names are the case-sensitive literals `SEQUENTIAL`, `CONCURRENT`,
/// `SEQUENTIAL_WITH_FIRST_RESULT` and `SEQUENTIAL_BLOCKING_ONLY_FIRST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Chain: each task receives the previous task's output.
    Sequential,
    /// Fan-out in bounded batches against the same input; outputs discarded.
    Concurrent,
    /// Try tasks in order; the first success wins.
    SequentialWithFirstResult,
    /// Run the first task inline, replicate to the rest in the background.
    SequentialBlockingOnlyFirst,
}

impl Strategy {
    /// All strategies, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Sequential,
        Self::Concurrent,
        Self::SequentialWithFirstResult,
        Self::SequentialBlockingOnlyFirst,
    ];

    /// Returns the literal name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "SEQUENTIAL",
            Self::Concurrent => "CONCURRENT",
            Self::SequentialWithFirstResult => "SEQUENTIAL_WITH_FIRST_RESULT",
            Self::SequentialBlockingOnlyFirst => "SEQUENTIAL_BLOCKING_ONLY_FIRST",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| PipeError::UnknownStrategy(s.to_string()))
    }
}

/// Configuration for a pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Name used in logs and events.
    pub name: String,
    /// Maximum number of tasks in flight during a concurrent fan-out.
    pub batch_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            name: "pipe".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PipeConfig {
    /// Creates a new pipe config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pipe name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Returns the batch size actually used.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
