//! Testing utilities for vote pipes.
//!
//! This module provides:
//! - In-memory and always-failing vote stores
//! - Counting and slow tasks for engine tests and benchmarks

mod stores;
mod tasks;

pub use stores::{FailingVoteStore, InMemoryVoteStore};
pub use tasks::{CountingTask, SlowTask};
