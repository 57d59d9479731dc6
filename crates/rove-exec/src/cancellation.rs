// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Raised by [`CancellationToken::check`] once the token is cancelled.
#[derive(Debug, Clone, Copy, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Monotonic, hierarchical cancellation.
///
/// Once cancelled a token stays cancelled.  A child token cancels when its
/// parent does; cancelling a child never affects the parent.  The engine
/// checks tokens before each cycle, before each tool call, and before each
/// sharded cycle dispatch; in-flight operations are allowed to finish.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.inner.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Derive a token that cancels with this one but can also be cancelled
    /// independently without touching the parent.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    /// Run `callback` when the token is cancelled; fires immediately if it
    /// already is.  Must be called from within a tokio runtime.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        if self.inner.is_cancelled() {
            callback();
            return;
        }
        let token = self.inner.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            callback();
        });
    }

    /// Resolves when the token is cancelled.
    pub async fn wait(&self) {
        self.inner.cancelled().await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.cancelled())
            .finish()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_monotonic() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.cancelled());
        assert!(token.check().is_err());
        token.cancel();
        assert!(token.cancelled());
    }

    #[test]
    fn parent_cancel_propagates_to_child() {
        let parent = CancellationToken::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.cancelled());
    }

    #[test]
    fn child_cancel_does_not_propagate_up() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.cancelled());
        assert!(!parent.cancelled());
    }

    #[tokio::test]
    async fn on_cancel_fires_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        token.on_cancel(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn on_cancel_fires_after_cancel() {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        token.on_cancel(move || flag.store(true, Ordering::SeqCst));
        token.cancel();
        token.wait().await;
        // The spawned waiter gets a chance to run.
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
