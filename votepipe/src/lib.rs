//! # Votepipe
//!
//! A generic task-pipeline executor and the vote-counting composition layer
//! built on top of it.
//!
//! Votepipe provides:
//!
//! - **Pipes**: ordered tasks run under a selectable strategy (sequential
//!   chain, bounded concurrent fan-out, first result, commit-then-replicate)
//! - **Skip signal**: tasks can opt out without failing the pipe
//! - **Operation registry**: binds each operation to a pipe and strategy
//! - **Aggregator**: builds one pipe per operation over a list of stores
//! - **Cancellation handling**: caller contexts, detached background work and
//!   a drainable background registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use votepipe::prelude::*;
//! use votepipe::testing::InMemoryVoteStore;
//!
//! let stores: Vec<Arc<dyn VoteStore>> = vec![
//!     Arc::new(InMemoryVoteStore::new("primary")),
//!     Arc::new(InMemoryVoteStore::new("replica")),
//! ];
//! let aggregator = Aggregator::new(stores);
//! let commands = aggregator.command_use_case()?;
//! let queries = aggregator.query_use_case()?;
//!
//! let ctx = TaskContext::new();
//! commands.create_vote(&ctx, Vote::new("round-1", "amy")).await?;
//! let total = queries.get_total_votes(&ctx, "round-1").await?;
//!
//! aggregator.background().shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod cancellation;
pub mod context;
pub mod domain;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipe;
pub mod registry;
pub mod store;
pub mod task;
pub mod testing;
pub mod usecase;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{Aggregator, StrategyPolicy};
    pub use crate::cancellation::{BackgroundConfig, BackgroundTasks, CancellationToken, DrainReport};
    pub use crate::context::{RunIdentity, TaskContext};
    pub use crate::domain::{QueryResult, Vote, VoteQuery, Winner};
    pub use crate::errors::{
        MultiError, PipeError, PipeFailure, RegistryError, StoreError, TaskError, VoteError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, TracingConfig};
    pub use crate::pipe::{Pipe, PipeConfig, PipeResult, Strategy};
    pub use crate::registry::{Operation, OperationRegistry, RegistryBuilder};
    pub use crate::store::VoteStore;
    pub use crate::task::{async_task, task, AsyncFnTask, FnTask, Task, TaskRef};
    pub use crate::usecase::{CommandVoteUseCase, QueryVoteUseCase, VoteCommands, VoteQueries};
    pub use std::sync::Arc;
}
