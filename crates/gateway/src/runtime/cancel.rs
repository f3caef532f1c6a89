//! Per-task cancellation tokens.
//!
//! Each running turn attempt registers a `CancelToken` under its task id.
//! The graph engine checks the token at loop boundaries and races it
//! against LLM suspension points, so a cancelled turn aborts at the next
//! safe opportunity and ends with an `interrupted` terminal row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token checked cooperatively by the runtime loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation is requested. Used to race suspension
    /// points (LLM calls, stream reads) against a stop signal.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // Register interest before the re-check so a cancel landing
            // in between cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Active cancellation tokens keyed by task id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new token for a task attempt.
    pub fn register(&self, task_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(task_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running turn. Returns true if a token was found.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tokens.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token for a task (called when the attempt completes).
    pub fn remove(&self, task_id: &str) {
        self.tokens.lock().remove(task_id);
    }

    /// Whether a task has an active (running) attempt.
    pub fn is_running(&self, task_id: &str) -> bool {
        self.tokens.lock().contains_key(task_id)
    }
}
