//! Run identity for correlating pipe executions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one logical request flowing through one or more pipes.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RunIdentity {
    /// The unique ID for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    /// The request ID supplied by the caller, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Returns the run ID rendered for logs, or `"-"`.
    #[must_use]
    pub fn run_id_str(&self) -> String {
        self.run_id.map_or_else(|| "-".to_string(), |id| id.to_string())
    }
}
