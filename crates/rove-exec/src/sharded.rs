// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rove_types::{
    summarize_task_token_usage, AgentResult, AgentStatus, AgentTask, Checkpoint,
};

use crate::backend::{CycleExecutor, ExecutionBackend, RunState};
use crate::context::ExecutionContext;
use crate::state::StateStore;

/// JSON-serializable description a worker needs to rebuild an engine.
///
/// Travels through the broker alongside the task; every field must survive
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRecipe {
    pub settings_file: String,
    pub backend: String,
    pub model: String,
    pub workspace: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub hook_class_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_preview_chars: Option<usize>,
}

fn default_timeout() -> f64 {
    90.0
}

/// Outcome of one remotely executed cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleDispatch {
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
}

impl CycleDispatch {
    pub fn pending() -> Self {
        Self {
            finished: false,
            result: None,
        }
    }

    pub fn finished(result: AgentResult) -> Self {
        Self {
            finished: true,
            result: Some(result),
        }
    }
}

/// Transport that hands a single cycle to a worker and awaits its outcome.
/// The in-process broker in `rove-core` is the eager-mode implementation;
/// production brokers put a message queue behind this trait.
#[async_trait]
pub trait CycleBroker: Send + Sync {
    async fn run_cycle(
        &self,
        task: &AgentTask,
        recipe: &RuntimeRecipe,
        cycle_index: u32,
    ) -> anyhow::Result<CycleDispatch>;
}

/// Cycle-sharded backend: each cycle becomes an independent remote job,
/// serialized through checkpoints in the shared state store.  At most one
/// cycle of a given task is in flight.
pub struct ShardedBackend {
    broker: Arc<dyn CycleBroker>,
    store: Arc<dyn StateStore>,
    recipe: RuntimeRecipe,
}

impl ShardedBackend {
    pub fn new(broker: Arc<dyn CycleBroker>, store: Arc<dyn StateStore>, recipe: RuntimeRecipe) -> Self {
        Self { broker, store, recipe }
    }

    pub fn recipe(&self) -> &RuntimeRecipe {
        &self.recipe
    }

    fn result_from_checkpoint(&self, task_id: &str, status: AgentStatus, error: Option<String>) -> AgentResult {
        let checkpoint = self.store.load_checkpoint(task_id).ok().flatten();
        let (messages, cycles, shared_state) = match checkpoint {
            Some(cp) => (cp.messages, cp.cycles, cp.shared_state),
            None => (Vec::new(), Vec::new(), Default::default()),
        };
        let token_usage = summarize_task_token_usage(&cycles);
        let final_answer = (status == AgentStatus::MaxCycles)
            .then(|| "Reached max cycles without finish signal.".to_string());
        AgentResult {
            status,
            messages,
            cycles,
            final_answer,
            wait_reason: None,
            error,
            shared_state,
            token_usage,
        }
    }

    async fn distributed_loop(
        &self,
        task: &AgentTask,
        ctx: Option<&ExecutionContext>,
        max_cycles: u32,
    ) -> AgentResult {
        for cycle_index in 1..=max_cycles {
            if let Some(ctx) = ctx {
                if ctx.check_cancelled().is_err() {
                    return self.result_from_checkpoint(
                        &task.task_id,
                        AgentStatus::Failed,
                        Some("Operation was cancelled".to_string()),
                    );
                }
            }

            let dispatch = match self.broker.run_cycle(task, &self.recipe, cycle_index).await {
                Ok(dispatch) => dispatch,
                Err(err) => {
                    return self.result_from_checkpoint(
                        &task.task_id,
                        AgentStatus::Failed,
                        Some(format!("Distributed cycle {cycle_index} failed: {err}")),
                    );
                }
            };

            if dispatch.finished {
                return dispatch.result.unwrap_or_else(|| {
                    self.result_from_checkpoint(
                        &task.task_id,
                        AgentStatus::Failed,
                        Some(format!("Distributed cycle {cycle_index} finished without a result")),
                    )
                });
            }
        }
        self.result_from_checkpoint(&task.task_id, AgentStatus::MaxCycles, None)
    }
}

#[async_trait]
impl ExecutionBackend for ShardedBackend {
    async fn execute(
        &self,
        task: &AgentTask,
        state: RunState,
        _executor: Arc<dyn CycleExecutor>,
        ctx: Option<ExecutionContext>,
        max_cycles: u32,
    ) -> AgentResult {
        // Seed the first worker's checkpoint before any dispatch.
        let shared_state = state.shared.lock().expect("shared state lock").clone();
        let seed = Checkpoint {
            task_id: task.task_id.clone(),
            cycle_index: 0,
            status: AgentStatus::Running,
            messages: state.messages.clone(),
            cycles: Vec::new(),
            shared_state,
        };
        if let Err(err) = self.store.save_checkpoint(&seed) {
            return AgentResult {
                status: AgentStatus::Failed,
                messages: state.messages,
                cycles: Vec::new(),
                final_answer: None,
                wait_reason: None,
                error: Some(format!("Failed to save initial checkpoint: {err}")),
                shared_state: state.shared.lock().expect("shared state lock").clone(),
                token_usage: Default::default(),
            };
        }

        let result = self.distributed_loop(task, ctx.as_ref(), max_cycles).await;

        // The last worker deletes the checkpoint on a terminal result; this
        // cleanup only matters on the failure paths.
        if let Err(err) = self.store.delete_checkpoint(&task.task_id) {
            debug!(task_id = %task.task_id, error = %err, "checkpoint cleanup failed");
        }
        result
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rove_types::{shared_state, Message};

    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::state::InMemoryStateStore;

    fn recipe() -> RuntimeRecipe {
        RuntimeRecipe {
            settings_file: "settings.json".into(),
            backend: "test".into(),
            model: "test-model".into(),
            workspace: "/tmp/ws".into(),
            timeout_seconds: 90.0,
            hook_class_paths: vec![],
            log_preview_chars: None,
        }
    }

    struct NeverFinishesBroker;

    #[async_trait]
    impl CycleBroker for NeverFinishesBroker {
        async fn run_cycle(&self, _t: &AgentTask, _r: &RuntimeRecipe, _i: u32) -> anyhow::Result<CycleDispatch> {
            Ok(CycleDispatch::pending())
        }
    }

    struct FailingBroker;

    #[async_trait]
    impl CycleBroker for FailingBroker {
        async fn run_cycle(&self, _t: &AgentTask, _r: &RuntimeRecipe, i: u32) -> anyhow::Result<CycleDispatch> {
            anyhow::bail!("worker {i} unreachable")
        }
    }

    struct DummyExecutor;

    #[async_trait]
    impl CycleExecutor for DummyExecutor {
        async fn run_cycle(&self, _i: u32, _s: &mut RunState, _c: Option<&ExecutionContext>) -> Option<AgentResult> {
            None
        }
    }

    fn state() -> RunState {
        RunState::new(vec![Message::system("s"), Message::user("u")], shared_state(None))
    }

    #[test]
    fn recipe_round_trips() {
        let original = RuntimeRecipe {
            hook_class_paths: vec!["hooks.Audit".into()],
            log_preview_chars: Some(300),
            ..recipe()
        };
        let json = serde_json::to_string(&original).unwrap();
        let back: RuntimeRecipe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[tokio::test]
    async fn seeds_checkpoint_before_first_dispatch() {
        let store = Arc::new(InMemoryStateStore::new());
        let backend = ShardedBackend::new(Arc::new(NeverFinishesBroker), Arc::clone(&store) as _, recipe());
        let task = AgentTask::new("sharded-1", "m", "s", "u");
        // One pending cycle, then budget exhausted: checkpoint existed during
        // the run and the exit path cleans it up.
        let result = backend
            .execute(&task, state(), Arc::new(DummyExecutor), None, 1)
            .await;
        assert_eq!(result.status, AgentStatus::MaxCycles);
        assert!(store.load_checkpoint("sharded-1").unwrap().is_none(), "cleanup deletes checkpoint");
    }

    #[tokio::test]
    async fn broker_failure_reports_cycle_index() {
        let store = Arc::new(InMemoryStateStore::new());
        let backend = ShardedBackend::new(Arc::new(FailingBroker), store as _, recipe());
        let task = AgentTask::new("sharded-2", "m", "s", "u");
        let result = backend
            .execute(&task, state(), Arc::new(DummyExecutor), None, 4)
            .await;
        assert_eq!(result.status, AgentStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("cycle 1"), "{error}");
        assert!(error.contains("unreachable"), "{error}");
    }

    #[tokio::test]
    async fn cancellation_checked_before_each_dispatch() {
        let store = Arc::new(InMemoryStateStore::new());
        let backend = ShardedBackend::new(Arc::new(NeverFinishesBroker), store as _, recipe());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::new().with_cancellation(token);
        let task = AgentTask::new("sharded-3", "m", "s", "u");
        let result = backend
            .execute(&task, state(), Arc::new(DummyExecutor), Some(ctx), 4)
            .await;
        assert_eq!(result.status, AgentStatus::Failed);
        assert!(result.error.unwrap().to_lowercase().contains("cancelled"));
    }
}
