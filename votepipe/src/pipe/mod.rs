//! Pipe building and execution.
//!
//! This module provides:
//! - Execution strategies and their literal names
//! - Pipe configuration
//! - The pipe executor

mod executor;
mod integration_tests;
mod strategy;

pub use executor::{Pipe, PipeResult};
pub use strategy::{PipeConfig, Strategy, DEFAULT_BATCH_SIZE};
