//! Composition of vote pipes from a list of stores.
//!
//! The aggregator builds one pipe per operation, with one task per store in
//! the order the stores were given. The first store is the primary: it
//! decides the result of a write and is asked first on reads.

use crate::cancellation::BackgroundTasks;
use crate::context::TaskContext;
use crate::domain::{QueryResult, Vote, VoteQuery, Winner};
use crate::errors::{PipeError, TaskError, VoteError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipe::{Pipe, PipeConfig, Strategy};
use crate::registry::{Operation, OperationRegistry, RegistryBuilder};
use crate::store::VoteStore;
use crate::task::{Task, TaskRef};
use crate::usecase::{VoteCommands, VoteQueries};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Strategy name per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyPolicy {
    strategies: HashMap<Operation, String>,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self {
            strategies: Operation::ALL
                .into_iter()
                .map(|op| (op, Self::default_for(op).as_str().to_string()))
                .collect(),
        }
    }
}

impl StrategyPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes commit to the primary and replicate; reads take the first answer.
    #[must_use]
    pub const fn default_for(operation: Operation) -> Strategy {
        if operation.is_command() {
            Strategy::SequentialBlockingOnlyFirst
        } else {
            Strategy::SequentialWithFirstResult
        }
    }

    /// Parses a JSON object of operation → strategy name, on top of the defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let overrides: HashMap<Operation, String> = serde_json::from_str(json)?;
        Ok(overrides
            .into_iter()
            .fold(Self::default(), |policy, (op, name)| policy.with_strategy(op, name)))
    }

    /// Sets the strategy name for an operation. Validated on [`resolve`](Self::resolve).
    #[must_use]
    pub fn with_strategy(mut self, operation: Operation, strategy: impl Into<String>) -> Self {
        self.strategies.insert(operation, strategy.into());
        self
    }

    /// Returns the strategy for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`PipeError::UnknownStrategy`] if the configured name is not a
    /// known strategy.
    pub fn resolve(&self, operation: Operation) -> Result<Strategy, PipeError> {
        self.strategies
            .get(&operation)
            .map_or(Ok(Self::default_for(operation)), |name| name.parse())
    }
}

/// Writes a vote to one store.
struct RegisterVoteTask {
    name: String,
    store: Arc<dyn VoteStore>,
}

#[async_trait]
impl Task<Vote> for RegisterVoteTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext, input: &Vote) -> Result<Vote, TaskError> {
        self.store.register_vote(input).await?;
        Ok(input.clone())
    }
}

impl fmt::Debug for RegisterVoteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterVoteTask").field("name", &self.name).finish()
    }
}

/// Answers one query operation from one store.
///
/// Store errors are reported before the emptiness check, so a failing store
/// is never mistaken for one with nothing to say.
struct QueryTask {
    name: String,
    operation: Operation,
    store: Arc<dyn VoteStore>,
}

impl QueryTask {
    async fn answer(&self, query: &VoteQuery) -> Result<QueryResult, TaskError> {
        let round = query.round_id.as_str();
        match self.operation {
            Operation::GetTotalVotes => match self.store.total_votes(round).await? {
                0 => Err(TaskError::Skip),
                total => Ok(QueryResult::Total(total)),
            },
            Operation::GetTotalVotesForParticipant => {
                non_empty(self.store.totals_by_participant(round).await?).map(QueryResult::ByParticipant)
            }
            Operation::GetTotalVotesForHour => {
                non_empty(self.store.totals_by_hour(round).await?).map(QueryResult::ByHour)
            }
            Operation::GetWinner => {
                let totals = self.store.totals_by_participant(round).await?;
                Winner::from_totals(&totals)
                    .map(QueryResult::Winner)
                    .ok_or(TaskError::Skip)
            }
            Operation::GetVotesFromParticipant => {
                let participant = query
                    .participant_id
                    .as_deref()
                    .ok_or_else(|| TaskError::failed("participant_id is required"))?;
                let totals = self.store.totals_by_participant(round).await?;
                match totals.get(participant).copied() {
                    None | Some(0) => Err(TaskError::Skip),
                    Some(total) => Ok(QueryResult::ParticipantTotal(total)),
                }
            }
            Operation::CreateVote => Err(TaskError::failed("CreateVote is not a query")),
        }
    }
}

fn non_empty(totals: HashMap<String, u64>) -> Result<HashMap<String, u64>, TaskError> {
    if totals.is_empty() {
        Err(TaskError::Skip)
    } else {
        Ok(totals)
    }
}

#[async_trait]
impl Task<VoteQuery> for QueryTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &TaskContext, input: &VoteQuery) -> Result<VoteQuery, TaskError> {
        let result = self.answer(input).await?;
        Ok(input.answered(result))
    }
}

impl fmt::Debug for QueryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTask")
            .field("name", &self.name)
            .field("operation", &self.operation)
            .finish()
    }
}

fn task_name(operation: Operation, store: &dyn VoteStore) -> String {
    format!("{operation}@{}", store.name())
}

/// Builds the vote registries and use cases from a list of stores.
pub struct Aggregator {
    stores: Vec<Arc<dyn VoteStore>>,
    policy: StrategyPolicy,
    pipe_config: PipeConfig,
    background: Arc<BackgroundTasks>,
    event_sink: Arc<dyn EventSink>,
}

impl Aggregator {
    /// Creates an aggregator over `stores`, primary first.
    #[must_use]
    pub fn new(stores: Vec<Arc<dyn VoteStore>>) -> Self {
        Self {
            stores,
            policy: StrategyPolicy::default(),
            pipe_config: PipeConfig::default(),
            background: Arc::new(BackgroundTasks::new()),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the strategy policy.
    #[must_use]
    pub fn with_policy(mut self, policy: StrategyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the configuration every pipe starts from. Pipe names are
    /// replaced by operation names.
    #[must_use]
    pub fn with_pipe_config(mut self, config: PipeConfig) -> Self {
        self.pipe_config = config;
        self
    }

    /// Sets the background registry used for replication.
    #[must_use]
    pub fn with_background(mut self, background: Arc<BackgroundTasks>) -> Self {
        self.background = background;
        self
    }

    /// Sets the event sink shared by every pipe.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the background registry, for draining on shutdown.
    #[must_use]
    pub fn background(&self) -> &Arc<BackgroundTasks> {
        &self.background
    }

    /// Returns the store names, in order.
    #[must_use]
    pub fn store_names(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.name()).collect()
    }

    fn build_pipe<T>(&self, operation: Operation, tasks: Vec<TaskRef<T>>) -> Arc<Pipe<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut pipe = Pipe::with_config(self.pipe_config.clone().with_name(operation.as_str()))
            .with_background(self.background.clone())
            .with_event_sink(self.event_sink.clone());
        pipe.enqueue(tasks);
        Arc::new(pipe)
    }

    /// Builds the write-side registry.
    ///
    /// # Errors
    ///
    /// Fails if the policy names an unknown strategy.
    pub fn command_registry(&self) -> Result<OperationRegistry<Vote>, VoteError> {
        let operation = Operation::CreateVote;
        let strategy = self.policy.resolve(operation)?;
        let tasks: Vec<TaskRef<Vote>> = self
            .stores
            .iter()
            .map(|store| -> TaskRef<Vote> {
                Arc::new(RegisterVoteTask {
                    name: task_name(operation, store.as_ref()),
                    store: store.clone(),
                })
            })
            .collect();

        info!(operation = %operation, strategy = %strategy, stores = self.stores.len(), "Built command pipe");
        let registry = RegistryBuilder::new()
            .register(operation, strategy, self.build_pipe(operation, tasks))?
            .build();
        Ok(registry)
    }

    /// Builds the read-side registry.
    ///
    /// # Errors
    ///
    /// Fails if the policy names an unknown strategy.
    pub fn query_registry(&self) -> Result<OperationRegistry<VoteQuery>, VoteError> {
        let mut builder = RegistryBuilder::new();
        for operation in Operation::ALL.into_iter().filter(|op| !op.is_command()) {
            let strategy = self.policy.resolve(operation)?;
            let tasks: Vec<TaskRef<VoteQuery>> = self
                .stores
                .iter()
                .map(|store| -> TaskRef<VoteQuery> {
                    Arc::new(QueryTask {
                        name: task_name(operation, store.as_ref()),
                        operation,
                        store: store.clone(),
                    })
                })
                .collect();

            info!(operation = %operation, strategy = %strategy, stores = self.stores.len(), "Built query pipe");
            builder = builder.register(operation, strategy, self.build_pipe(operation, tasks))?;
        }
        Ok(builder.build())
    }

    /// Builds the command use case.
    ///
    /// # Errors
    ///
    /// Fails if the policy names an unknown strategy.
    pub fn command_use_case(&self) -> Result<VoteCommands, VoteError> {
        Ok(VoteCommands::new(Arc::new(self.command_registry()?)))
    }

    /// Builds the query use case.
    ///
    /// # Errors
    ///
    /// Fails if the policy names an unknown strategy.
    pub fn query_use_case(&self) -> Result<VoteQueries, VoteError> {
        Ok(VoteQueries::new(Arc::new(self.query_registry()?)))
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("stores", &self.store_names())
            .field("policy", &self.policy)
            .field("pipe_config", &self.pipe_config)
            .finish()
    }
}
