//! Command and query use cases over the operation registries.
//!
//! Each call builds the pipe input, dispatches it through the registry and
//! unpacks the answer. The use cases never touch a store directly.

use crate::context::TaskContext;
use crate::domain::{QueryResult, Vote, VoteQuery, Winner};
use crate::errors::VoteError;
use crate::registry::{Operation, OperationRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Write side of the vote API.
#[async_trait]
pub trait CommandVoteUseCase: Send + Sync {
    /// Registers a vote.
    async fn create_vote(&self, ctx: &TaskContext, vote: Vote) -> Result<(), VoteError>;
}

/// Read side of the vote API.
#[async_trait]
pub trait QueryVoteUseCase: Send + Sync {
    /// Total votes in a round.
    async fn get_total_votes(&self, ctx: &TaskContext, round_id: &str) -> Result<u64, VoteError>;

    /// Votes per participant in a round.
    async fn get_total_votes_for_participant(
        &self,
        ctx: &TaskContext,
        round_id: &str,
    ) -> Result<HashMap<String, u64>, VoteError>;

    /// Votes per hour bucket in a round.
    async fn get_total_votes_for_hour(
        &self,
        ctx: &TaskContext,
        round_id: &str,
    ) -> Result<HashMap<String, u64>, VoteError>;

    /// The participant with the most votes, if anyone voted.
    async fn get_winner(&self, ctx: &TaskContext, round_id: &str) -> Result<Option<Winner>, VoteError>;

    /// Votes received by one participant.
    async fn get_votes_from_participant(
        &self,
        ctx: &TaskContext,
        round_id: &str,
        participant_id: &str,
    ) -> Result<u64, VoteError>;
}

/// [`CommandVoteUseCase`] backed by a registry of vote pipes.
#[derive(Debug, Clone)]
pub struct VoteCommands {
    registry: Arc<OperationRegistry<Vote>>,
}

impl VoteCommands {
    /// Wraps a command registry.
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry<Vote>>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperationRegistry<Vote>> {
        &self.registry
    }
}

#[async_trait]
impl CommandVoteUseCase for VoteCommands {
    async fn create_vote(&self, ctx: &TaskContext, vote: Vote) -> Result<(), VoteError> {
        vote.validate()?;
        debug!(
            round_id = %vote.round_id,
            participant_id = %vote.participant_id,
            "Registering vote"
        );
        self.registry.dispatch(ctx, Operation::CreateVote, vote).await?;
        Ok(())
    }
}

/// [`QueryVoteUseCase`] backed by a registry of query pipes.
#[derive(Debug, Clone)]
pub struct VoteQueries {
    registry: Arc<OperationRegistry<VoteQuery>>,
}

impl VoteQueries {
    /// Wraps a query registry.
    #[must_use]
    pub fn new(registry: Arc<OperationRegistry<VoteQuery>>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperationRegistry<VoteQuery>> {
        &self.registry
    }

    /// Dispatches a query and returns whatever result the pipe settled on.
    ///
    /// `None` means every store skipped.
    async fn run(
        &self,
        ctx: &TaskContext,
        operation: Operation,
        query: VoteQuery,
    ) -> Result<Option<QueryResult>, VoteError> {
        let answered = self.registry.dispatch(ctx, operation, query).await?;
        Ok(answered.result)
    }
}

fn unexpected(operation: Operation, found: &QueryResult) -> VoteError {
    VoteError::UnexpectedResult {
        operation,
        found: found.kind().to_string(),
    }
}

#[async_trait]
impl QueryVoteUseCase for VoteQueries {
    async fn get_total_votes(&self, ctx: &TaskContext, round_id: &str) -> Result<u64, VoteError> {
        let op = Operation::GetTotalVotes;
        match self.run(ctx, op, VoteQuery::round(round_id)).await? {
            None => Ok(0),
            Some(QueryResult::Total(total)) => Ok(total),
            Some(other) => Err(unexpected(op, &other)),
        }
    }

    async fn get_total_votes_for_participant(
        &self,
        ctx: &TaskContext,
        round_id: &str,
    ) -> Result<HashMap<String, u64>, VoteError> {
        let op = Operation::GetTotalVotesForParticipant;
        match self.run(ctx, op, VoteQuery::round(round_id)).await? {
            None => Ok(HashMap::new()),
            Some(QueryResult::ByParticipant(totals)) => Ok(totals),
            Some(other) => Err(unexpected(op, &other)),
        }
    }

    async fn get_total_votes_for_hour(
        &self,
        ctx: &TaskContext,
        round_id: &str,
    ) -> Result<HashMap<String, u64>, VoteError> {
        let op = Operation::GetTotalVotesForHour;
        match self.run(ctx, op, VoteQuery::round(round_id)).await? {
            None => Ok(HashMap::new()),
            Some(QueryResult::ByHour(totals)) => Ok(totals),
            Some(other) => Err(unexpected(op, &other)),
        }
    }

    async fn get_winner(&self, ctx: &TaskContext, round_id: &str) -> Result<Option<Winner>, VoteError> {
        let op = Operation::GetWinner;
        match self.run(ctx, op, VoteQuery::round(round_id)).await? {
            None => Ok(None),
            Some(QueryResult::Winner(winner)) => Ok(Some(winner)),
            Some(other) => Err(unexpected(op, &other)),
        }
    }

    async fn get_votes_from_participant(
        &self,
        ctx: &TaskContext,
        round_id: &str,
        participant_id: &str,
    ) -> Result<u64, VoteError> {
        let op = Operation::GetVotesFromParticipant;
        let query = VoteQuery::round(round_id).for_participant(participant_id);
        match self.run(ctx, op, query).await? {
            None => Ok(0),
            Some(QueryResult::ParticipantTotal(total)) => Ok(total),
            Some(other) => Err(unexpected(op, &other)),
        }
    }
}
