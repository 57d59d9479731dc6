// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use rove_types::{StateMap, StreamCallback};

use crate::cancellation::{Cancelled, CancellationToken};
use crate::state::StateStore;

/// Per-run execution environment handed down through engine, backends,
/// tool-call runner, and sub-tasks.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub cancellation_token: Option<CancellationToken>,
    pub stream_callback: Option<StreamCallback>,
    pub state_store: Option<Arc<dyn StateStore>>,
    pub metadata: StateMap,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    pub fn with_stream_callback(mut self, callback: StreamCallback) -> Self {
        self.stream_callback = Some(callback);
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Err once the run's token has been cancelled; Ok when no token is set.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        match &self.cancellation_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Context for a nested run: child cancellation token (parent cancel
    /// propagates down, child failures stay contained), shared stream
    /// callback and store, copied metadata.
    pub fn child(&self) -> Self {
        Self {
            cancellation_token: self.cancellation_token.as_ref().map(|t| t.child()),
            stream_callback: self.stream_callback.clone(),
            state_store: self.state_store.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancellation_token", &self.cancellation_token)
            .field("has_stream_callback", &self.stream_callback.is_some())
            .field("has_state_store", &self.state_store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_without_token_is_ok() {
        assert!(ExecutionContext::new().check_cancelled().is_ok());
    }

    #[test]
    fn check_reflects_token_state() {
        let token = CancellationToken::new();
        let ctx = ExecutionContext::new().with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(ctx.check_cancelled().is_err());
    }

    #[test]
    fn child_context_inherits_cancellation_downward_only() {
        let token = CancellationToken::new();
        let parent = ExecutionContext::new().with_cancellation(token.clone());
        let child = parent.child();

        // Child cancel leaves the parent alone.
        child.cancellation_token.as_ref().unwrap().cancel();
        assert!(parent.check_cancelled().is_ok());

        // Parent cancel reaches a fresh child.
        let second_child = parent.child();
        token.cancel();
        assert!(second_child.check_cancelled().is_err());
    }
}
