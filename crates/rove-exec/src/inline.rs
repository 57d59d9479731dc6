// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;

use rove_types::{AgentResult, AgentTask};

use crate::backend::{cancelled_result, max_cycles_result, CycleExecutor, ExecutionBackend, RunState};
use crate::context::ExecutionContext;

/// The trivial driver: cycles run on the caller's task, one after another.
#[derive(Default)]
pub struct InlineBackend;

impl InlineBackend {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) async fn drive_loop(
    state: RunState,
    executor: Arc<dyn CycleExecutor>,
    ctx: Option<ExecutionContext>,
    max_cycles: u32,
) -> AgentResult {
    let mut state = state;
    for cycle_index in 1..=max_cycles {
        if let Some(ctx) = &ctx {
            if ctx.check_cancelled().is_err() {
                return cancelled_result(state);
            }
        }
        if let Some(result) = executor.run_cycle(cycle_index, &mut state, ctx.as_ref()).await {
            return result;
        }
    }
    max_cycles_result(state)
}

#[async_trait]
impl ExecutionBackend for InlineBackend {
    async fn execute(
        &self,
        _task: &AgentTask,
        state: RunState,
        executor: Arc<dyn CycleExecutor>,
        ctx: Option<ExecutionContext>,
        max_cycles: u32,
    ) -> AgentResult {
        drive_loop(state, executor, ctx, max_cycles).await
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
