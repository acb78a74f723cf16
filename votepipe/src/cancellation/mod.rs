//! Structured cancellation utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative cancellation
//! - BackgroundTasks for tracking detached work until shutdown

mod background;
mod token;

pub use background::{BackgroundConfig, BackgroundTasks, DrainReport};
pub use token::{CancelCallback, CancellationToken};
