//! Vote domain types carried through the pipes.

use crate::errors::VoteError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Width of an hour bucket, in seconds.
pub const SECONDS_PER_HOUR: i64 = 3600;

/// A single vote cast for a participant in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// The round being voted in.
    pub round_id: String,
    /// The participant receiving the vote.
    pub participant_id: String,
    /// Unix timestamp, in seconds.
    pub timestamp: i64,
    /// Address the vote came from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Vote {
    /// Creates a vote stamped with the current time.
    #[must_use]
    pub fn new(round_id: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            round_id: round_id.into(),
            participant_id: participant_id.into(),
            timestamp: Utc::now().timestamp(),
            ip: None,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the source address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Rejects votes without a round or participant.
    pub fn validate(&self) -> Result<(), VoteError> {
        if self.round_id.trim().is_empty() {
            return Err(VoteError::InvalidVote("round_id is empty".to_string()));
        }
        if self.participant_id.trim().is_empty() {
            return Err(VoteError::InvalidVote("participant_id is empty".to_string()));
        }
        Ok(())
    }

    /// Returns the hour bucket key for this vote.
    #[must_use]
    pub fn hour_bucket(&self) -> String {
        self.timestamp.div_euclid(SECONDS_PER_HOUR).to_string()
    }
}

/// The participant with the most votes in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Winning participant.
    pub participant_id: String,
    /// Votes received.
    pub votes: u64,
}

impl Winner {
    /// Picks the participant with the most votes.
    ///
    /// Ties go to the lexicographically smallest id. Returns `None` when no
    /// participant has any votes.
    #[must_use]
    pub fn from_totals(totals: &HashMap<String, u64>) -> Option<Self> {
        totals
            .iter()
            .filter(|(_, votes)| **votes > 0)
            .max_by(|(a_id, a_votes), (b_id, b_votes)| a_votes.cmp(b_votes).then_with(|| b_id.cmp(a_id)))
            .map(|(id, votes)| Self {
                participant_id: id.clone(),
                votes: *votes,
            })
    }
}

/// Answer attached to a [`VoteQuery`] by whichever store produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    /// Total votes in the round.
    Total(u64),
    /// Votes per participant.
    ByParticipant(HashMap<String, u64>),
    /// Votes per hour bucket.
    ByHour(HashMap<String, u64>),
    /// The round's winner.
    Winner(Winner),
    /// Votes for a single participant.
    ParticipantTotal(u64),
}

impl QueryResult {
    /// Returns the variant name, for error reporting.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Total(_) => "total",
            Self::ByParticipant(_) => "by_participant",
            Self::ByHour(_) => "by_hour",
            Self::Winner(_) => "winner",
            Self::ParticipantTotal(_) => "participant_total",
        }
    }
}

/// A read request flowing through a query pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteQuery {
    /// Round to query.
    pub round_id: String,
    /// Participant to narrow to, for per-participant queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Filled in by the task that answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
}

impl VoteQuery {
    /// Creates a query for a round.
    #[must_use]
    pub fn round(round_id: impl Into<String>) -> Self {
        Self {
            round_id: round_id.into(),
            participant_id: None,
            result: None,
        }
    }

    /// Narrows the query to one participant.
    #[must_use]
    pub fn for_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    /// Returns a copy carrying `result`.
    #[must_use]
    pub fn answered(&self, result: QueryResult) -> Self {
        Self {
            round_id: self.round_id.clone(),
            participant_id: self.participant_id.clone(),
            result: Some(result),
        }
    }
}
