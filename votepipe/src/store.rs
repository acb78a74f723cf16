//! Backing-store contract.
//!
//! Implementations live outside this crate (a key-value store client, an
//! in-memory map). The aggregator only needs this trait.

use crate::domain::Vote;
use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;

/// A store that can record votes and answer counting queries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Name used in task names and logs.
    fn name(&self) -> &str;

    /// Records one vote.
    async fn register_vote(&self, vote: &Vote) -> Result<(), StoreError>;

    /// Total votes in a round.
    async fn total_votes(&self, round_id: &str) -> Result<u64, StoreError>;

    /// Votes per participant in a round.
    async fn totals_by_participant(&self, round_id: &str) -> Result<HashMap<String, u64>, StoreError>;

    /// Votes per hour bucket in a round.
    async fn totals_by_hour(&self, round_id: &str) -> Result<HashMap<String, u64>, StoreError>;
}
