// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use rove_exec::ExecutionContext;
use rove_types::{SharedState, StateMap, SubTaskOutcome, SubTaskRequest};
use rove_workspace::WorkspaceBackend;

/// Spawns isolated child runs on behalf of the sub-agent tools.
///
/// The engine installs an implementation when the task configures
/// sub-agents; it owns client resolution, prompt augmentation, and — for
/// `run_batch` — the execution backend's concurrency.
#[async_trait]
pub trait SubTaskRunner: Send + Sync {
    async fn run(&self, request: SubTaskRequest) -> SubTaskOutcome;

    /// Run several indexed requests, returning `(index, outcome)` pairs.
    async fn run_batch(&self, requests: Vec<(usize, SubTaskRequest)>) -> Vec<(usize, SubTaskOutcome)>;
}

/// Everything a tool handler may touch during one invocation.
#[derive(Clone)]
pub struct ToolContext {
    /// Absolute path of the run's workspace directory.
    pub workspace: PathBuf,
    pub workspace_backend: Arc<dyn WorkspaceBackend>,
    /// Mutable per-run state.  Handlers only touch the documented keys
    /// (`todo_list`, `active_skills`, `skill_activation_log`).
    pub shared_state: SharedState,
    pub cycle_index: u32,
    pub sub_task_runner: Option<Arc<dyn SubTaskRunner>>,
    pub execution_context: Option<ExecutionContext>,
}

impl ToolContext {
    pub fn new(workspace: PathBuf, workspace_backend: Arc<dyn WorkspaceBackend>, shared_state: SharedState) -> Self {
        Self {
            workspace,
            workspace_backend,
            shared_state,
            cycle_index: 0,
            sub_task_runner: None,
            execution_context: None,
        }
    }

    pub fn with_cycle_index(mut self, cycle_index: u32) -> Self {
        self.cycle_index = cycle_index;
        self
    }

    pub fn with_sub_task_runner(mut self, runner: Arc<dyn SubTaskRunner>) -> Self {
        self.sub_task_runner = Some(runner);
        self
    }

    pub fn with_execution_context(mut self, ctx: ExecutionContext) -> Self {
        self.execution_context = Some(ctx);
        self
    }

    /// Snapshot of the shared state map.
    pub fn shared_snapshot(&self) -> StateMap {
        self.shared_state.lock().expect("shared state lock").clone()
    }

    /// Mutate the shared state under its lock.
    pub fn update_shared<R>(&self, mutate: impl FnOnce(&mut StateMap) -> R) -> R {
        let mut guard = self.shared_state.lock().expect("shared state lock");
        mutate(&mut guard)
    }
}
