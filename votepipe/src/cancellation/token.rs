//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications. Receives the reason.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Besides polling [`is_cancelled`](Self::is_cancelled), async code can
/// await [`cancelled`](Self::cancelled).
///
/// A child token deregisters itself from its parent when dropped, so a
/// long-lived parent does not accumulate callbacks from finished children.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<(u64, CancelCallback)>>,
    /// Id handed to the next registered callback.
    next_id: AtomicU64,
    /// Parent token and the id of the callback linking it to this one.
    parent_link: Mutex<Option<(Weak<Self>, u64)>>,
    /// Wakes tasks waiting in `cancelled()`.
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever `parent` is.
    ///
    /// Cancelling the child leaves the parent untouched. Dropping the child
    /// removes its callback from the parent.
    #[must_use]
    pub fn child_of(parent: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let weak: Weak<Self> = Arc::downgrade(&child);
        let id = parent.register(Box::new(move |reason: &str| {
            if let Some(child) = weak.upgrade() {
                child.cancel(reason);
            }
        }));
        if let Some(id) = id {
            *child.parent_link.lock() = Some((Arc::downgrade(parent), id));
        }
        child
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            *self.reason.write() = Some(reason.clone());

            let callbacks = std::mem::take(&mut *self.callbacks.write());
            for (_, callback) in &callbacks {
                if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(&reason);
                })) {
                    warn!("Cancellation callback panicked: {:?}", e);
                }
            }

            self.notify.notify_waiters();
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register(Box::new(callback));
    }

    /// Stores the callback and returns its id, or runs it right away and
    /// returns `None` when the token is already cancelled.
    fn register(&self, callback: CancelCallback) -> Option<u64> {
        {
            // `cancel` flips the flag before draining under this lock.
            let mut callbacks = self.callbacks.write();
            if !self.is_cancelled() {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                callbacks.push((id, callback));
                return Some(id);
            }
        }

        let reason = self.reason().unwrap_or_default();
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(&reason);
        })) {
            warn!("Cancellation callback panicked: {:?}", e);
        }
        None
    }

    fn remove_callback(&self, id: u64) {
        self.callbacks.write().retain(|(cb_id, _)| *cb_id != id);
    }

    /// Returns how many callbacks are waiting for cancellation.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            // Created before the flag check so a concurrent cancel cannot slip between.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        if let Some((parent, id)) = self.parent_link.get_mut().take() {
            if let Some(parent) = parent.upgrade() {
                parent.remove_callback(id);
            }
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
