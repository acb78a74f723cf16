//! Store fixtures.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::Vote;
use crate::errors::StoreError;
use crate::store::VoteStore;

#[derive(Debug, Default, Clone)]
struct RoundTally {
    total: u64,
    by_participant: HashMap<String, u64>,
    by_hour: HashMap<String, u64>,
}

/// A [`VoteStore`] backed by a concurrent map.
#[derive(Debug)]
pub struct InMemoryVoteStore {
    name: String,
    rounds: DashMap<String, RoundTally>,
    writes: AtomicUsize,
}

impl InMemoryVoteStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rounds: DashMap::new(),
            writes: AtomicUsize::new(0),
        }
    }

    /// Records votes directly, bypassing any pipe.
    #[must_use]
    pub fn seeded(name: impl Into<String>, votes: impl IntoIterator<Item = Vote>) -> Self {
        let store = Self::new(name);
        for vote in votes {
            store.record(&vote);
        }
        store.writes.store(0, Ordering::SeqCst);
        store
    }

    /// Returns how many votes were written through [`VoteStore::register_vote`].
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record(&self, vote: &Vote) {
        let mut tally = self.rounds.entry(vote.round_id.clone()).or_default();
        tally.total += 1;
        *tally.by_participant.entry(vote.participant_id.clone()).or_insert(0) += 1;
        *tally.by_hour.entry(vote.hour_bucket()).or_insert(0) += 1;
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn tally(&self, round_id: &str) -> RoundTally {
        self.rounds
            .get(round_id)
            .map(|t| t.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register_vote(&self, vote: &Vote) -> Result<(), StoreError> {
        self.record(vote);
        Ok(())
    }

    async fn total_votes(&self, round_id: &str) -> Result<u64, StoreError> {
        Ok(self.tally(round_id).total)
    }

    async fn totals_by_participant(&self, round_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        Ok(self.tally(round_id).by_participant)
    }

    async fn totals_by_hour(&self, round_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        Ok(self.tally(round_id).by_hour)
    }
}

/// A [`VoteStore`] whose every call fails as unavailable.
#[derive(Debug)]
pub struct FailingVoteStore {
    name: String,
    calls: AtomicUsize,
}

impl FailingVoteStore {
    /// Creates a failing store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many calls were made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<R>(&self) -> Result<R, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable(self.name.clone()))
    }
}

#[async_trait]
impl VoteStore for FailingVoteStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn register_vote(&self, _vote: &Vote) -> Result<(), StoreError> {
        self.fail()
    }

    async fn total_votes(&self, _round_id: &str) -> Result<u64, StoreError> {
        self.fail()
    }

    async fn totals_by_participant(&self, _round_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        self.fail()
    }

    async fn totals_by_hour(&self, _round_id: &str) -> Result<HashMap<String, u64>, StoreError> {
        self.fail()
    }
}
