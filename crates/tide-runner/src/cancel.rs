// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation for runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable token used to stop a run from dispatching further nodes.
///
/// All clones share one flag; cancelling any clone is immediately visible
/// to the rest.  Cancellation is cooperative: runners stop scheduling new
/// nodes, in-flight work is left to finish, and everything undispatched is
/// reported as cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Flag>,
}

#[derive(Default)]
struct Flag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.  Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Has [`cancel`](Self::cancel) been called?
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled (immediately if it already
    /// is).
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
