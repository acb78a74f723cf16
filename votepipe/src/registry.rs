//! Operation registry: binds each named operation to a pipe and strategy.
//!
//! Built once through [`RegistryBuilder`], then frozen. The frozen registry
//! is a plain map read by any number of concurrent dispatchers without
//! locking.

use crate::context::TaskContext;
use crate::errors::{RegistryError, VoteError};
use crate::pipe::{Pipe, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// The closed set of operations the vote API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Register one vote.
    CreateVote,
    /// Total votes in a round.
    GetTotalVotes,
    /// Votes per participant in a round.
    GetTotalVotesForParticipant,
    /// Votes per hour bucket in a round.
    GetTotalVotesForHour,
    /// Participant with the most votes in a round.
    GetWinner,
    /// Votes received by one participant in a round.
    GetVotesFromParticipant,
}

impl Operation {
    /// Every operation.
    pub const ALL: [Self; 6] = [
        Self::CreateVote,
        Self::GetTotalVotes,
        Self::GetTotalVotesForParticipant,
        Self::GetTotalVotesForHour,
        Self::GetWinner,
        Self::GetVotesFromParticipant,
    ];

    /// Returns the operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateVote => "CreateVote",
            Self::GetTotalVotes => "GetTotalVotes",
            Self::GetTotalVotesForParticipant => "GetTotalVotesForParticipant",
            Self::GetTotalVotesForHour => "GetTotalVotesForHour",
            Self::GetWinner => "GetWinner",
            Self::GetVotesFromParticipant => "GetVotesFromParticipant",
        }
    }

    /// Returns true for operations that change state.
    #[must_use]
    pub const fn is_command(self) -> bool {
        matches!(self, Self::CreateVote)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownOperation(s.to_string()))
    }
}

/// A pipe bound to the strategy it runs with.
pub struct Registration<T> {
    /// The strategy used on dispatch.
    pub strategy: Strategy,
    /// The pipe.
    pub pipe: Arc<Pipe<T>>,
}

impl<T> Clone for Registration<T> {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy,
            pipe: self.pipe.clone(),
        }
    }
}

impl<T> fmt::Debug for Registration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("strategy", &self.strategy)
            .field("pipe", &self.pipe)
            .finish()
    }
}

/// Collects registrations and rejects duplicates.
pub struct RegistryBuilder<T> {
    entries: HashMap<Operation, Registration<T>>,
}

impl<T> RegistryBuilder<T> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers a pipe for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the operation is already registered.
    pub fn register(
        mut self,
        operation: Operation,
        strategy: Strategy,
        pipe: Arc<Pipe<T>>,
    ) -> Result<Self, RegistryError> {
        if self.entries.contains_key(&operation) {
            return Err(RegistryError::Duplicate(operation));
        }
        self.entries.insert(operation, Registration { strategy, pipe });
        Ok(self)
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> OperationRegistry<T> {
        OperationRegistry {
            entries: self.entries,
        }
    }
}

impl<T> Default for RegistryBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable operation → (strategy, pipe) map.
pub struct OperationRegistry<T> {
    entries: HashMap<Operation, Registration<T>>,
}

impl<T> OperationRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> RegistryBuilder<T> {
        RegistryBuilder::new()
    }

    /// Builds a registry from `(operation, strategy, pipe)` triples.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] on the first repeated operation.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Operation, Strategy, Arc<Pipe<T>>)>,
    ) -> Result<Self, RegistryError> {
        entries
            .into_iter()
            .try_fold(RegistryBuilder::new(), |builder, (op, strategy, pipe)| {
                builder.register(op, strategy, pipe)
            })
            .map(RegistryBuilder::build)
    }

    /// Looks up the registration for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unregistered`] if nothing is bound to it.
    pub fn lookup(&self, operation: Operation) -> Result<&Registration<T>, RegistryError> {
        self.entries
            .get(&operation)
            .ok_or(RegistryError::Unregistered(operation))
    }

    /// Runs the pipe bound to `operation` with its strategy.
    pub async fn dispatch(&self, ctx: &TaskContext, operation: Operation, input: T) -> Result<T, VoteError> {
        let registration = self.lookup(operation).map_err(|e| {
            warn!(operation = %operation, "Dispatch to unregistered operation");
            e
        })?;

        debug!(
            operation = %operation,
            strategy = %registration.strategy,
            run_id = %ctx.identity().run_id_str(),
            "Dispatching operation"
        );

        registration
            .pipe
            .execute(ctx, registration.strategy, input)
            .await
            .map_err(VoteError::from)
    }

    /// Returns true if the operation is registered.
    #[must_use]
    pub fn contains(&self, operation: Operation) -> bool {
        self.entries.contains_key(&operation)
    }

    /// Returns the strategy bound to an operation.
    #[must_use]
    pub fn strategy_of(&self, operation: Operation) -> Option<Strategy> {
        self.entries.get(&operation).map(|r| r.strategy)
    }

    /// Returns the registered operations, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.entries.keys().copied().collect();
        ops.sort();
        ops
    }

    /// Returns the number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> fmt::Debug for OperationRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<&Operation> = self.entries.keys().collect();
        ops.sort();
        f.debug_struct("OperationRegistry")
            .field("operations", &ops)
            .finish()
    }
}
