//! Execution context for tasks.
//!
//! This module provides:
//! - Run identities for log correlation
//! - The cancellable context every task receives

mod identity;
mod task_context;

pub use identity::RunIdentity;
pub use task_context::TaskContext;
