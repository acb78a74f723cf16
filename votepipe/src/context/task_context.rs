//! The context every task receives.

use super::RunIdentity;
use crate::cancellation::{BackgroundTasks, CancellationToken};
use std::sync::Arc;

/// Per-call context handed to tasks.
///
/// Cheap to clone. Carries the correlation identity and the cancellation
/// token governing the work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    identity: Arc<RunIdentity>,
    token: Arc<CancellationToken>,
    detached: bool,
}

impl TaskContext {
    /// Creates a fresh, uncancelled context with a new run identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(RunIdentity::new())
    }

    /// Creates a fresh context for the given identity.
    #[must_use]
    pub fn with_identity(identity: RunIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            token: Arc::new(CancellationToken::new()),
            detached: false,
        }
    }

    /// Creates a context governed by an existing token.
    #[must_use]
    pub fn with_token(identity: RunIdentity, token: Arc<CancellationToken>) -> Self {
        Self {
            identity: Arc::new(identity),
            token,
            detached: false,
        }
    }

    /// Derives a context that is cancelled with this one but can also be
    /// cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            token: CancellationToken::child_of(&self.token),
            detached: self.detached,
        }
    }

    /// Derives a context detached from this one's cancellation.
    ///
    /// The identity is kept for log correlation; cancellation follows the
    /// background registry's shutdown token instead of the caller.
    #[must_use]
    pub fn detached(&self, background: &BackgroundTasks) -> Self {
        Self::detached_with_token(&self.identity, background.shutdown_token().clone())
    }

    pub(crate) fn detached_with_token(
        identity: &Arc<RunIdentity>,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            identity: identity.clone(),
            token,
            detached: true,
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub(crate) fn identity_arc(&self) -> &Arc<RunIdentity> {
        &self.identity
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns true if this context runs detached from its caller.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.detached
    }

    /// Cancels this context (and its children).
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the cancellation reason, or a generic one.
    #[must_use]
    pub fn cancel_reason(&self) -> String {
        self.token
            .reason()
            .unwrap_or_else(|| "context cancelled".to_string())
    }

    /// Completes once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_not_cancelled() {
        let ctx = TaskContext::new();
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_detached());
        assert!(ctx.identity().run_id.is_some());
    }

    #[test]
    fn test_child_cancelled_with_parent() {
        let ctx = TaskContext::new();
        let child = ctx.child();
        assert_eq!(child.identity(), ctx.identity());

        ctx.cancel("client went away");
        assert!(child.is_cancelled());
        assert_eq!(child.cancel_reason(), "client went away");
    }

    #[test]
    fn test_detached_survives_caller_cancellation() {
        let background = BackgroundTasks::new();
        let ctx = TaskContext::new();
        let detached = ctx.detached(&background);

        ctx.cancel("request finished");
        assert!(!detached.is_cancelled());
        assert!(detached.is_detached());
        assert_eq!(detached.identity(), ctx.identity());

        background.shutdown_token().cancel("shutdown");
        assert!(detached.is_cancelled());
    }
}
