// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::future::BoxFuture;

use rove_types::{
    summarize_task_token_usage, AgentResult, AgentStatus, AgentTask, CycleRecord, Message, SharedState,
    SubTaskOutcome,
};

use crate::context::ExecutionContext;

/// Mutable state a backend threads through the cycle loop.
pub struct RunState {
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    pub shared: SharedState,
}

impl RunState {
    pub fn new(messages: Vec<Message>, shared: SharedState) -> Self {
        Self {
            messages,
            cycles: Vec::new(),
            shared,
        }
    }
}

/// One iteration of the reason–act loop.
///
/// Returning `Some(result)` ends the run; `None` means continue with the
/// next cycle.  Failures are encoded as `AgentStatus::Failed` results by
/// the engine, never as panics or errors across this seam.
#[async_trait]
pub trait CycleExecutor: Send + Sync {
    async fn run_cycle(
        &self,
        cycle_index: u32,
        state: &mut RunState,
        ctx: Option<&ExecutionContext>,
    ) -> Option<AgentResult>;
}

/// Drives the cycle loop to a terminal [`AgentResult`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        task: &AgentTask,
        state: RunState,
        executor: std::sync::Arc<dyn CycleExecutor>,
        ctx: Option<ExecutionContext>,
        max_cycles: u32,
    ) -> AgentResult;

    /// Run independent sub-task jobs, returning results in completion-agnostic
    /// input order.  The default executes sequentially; pool backends overlap
    /// the jobs.
    async fn dispatch_batch(
        &self,
        jobs: Vec<BoxFuture<'static, (usize, SubTaskOutcome)>>,
    ) -> Vec<(usize, SubTaskOutcome)> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(job.await);
        }
        outcomes
    }
}

/// Terminal result for a run cancelled before or between cycles.
pub fn cancelled_result(state: RunState) -> AgentResult {
    let token_usage = summarize_task_token_usage(&state.cycles);
    AgentResult {
        status: AgentStatus::Failed,
        messages: state.messages,
        cycles: state.cycles,
        final_answer: None,
        wait_reason: None,
        error: Some("Operation was cancelled".to_string()),
        shared_state: state.shared.lock().expect("shared state lock").clone(),
        token_usage,
    }
}

/// Terminal result for a run that exhausted its cycle budget.
pub fn max_cycles_result(state: RunState) -> AgentResult {
    let token_usage = summarize_task_token_usage(&state.cycles);
    AgentResult {
        status: AgentStatus::MaxCycles,
        messages: state.messages,
        cycles: state.cycles,
        final_answer: Some("Reached max cycles without finish signal.".to_string()),
        wait_reason: None,
        error: None,
        shared_state: state.shared.lock().expect("shared state lock").clone(),
        token_usage,
    }
}
