// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rove_exec::{CycleBroker, CycleDispatch, RunState, RuntimeRecipe, StateStore};
use rove_types::{shared_state, AgentResult, AgentStatus, AgentTask, Checkpoint, TaskTokenUsage};

use crate::engine::AgentRuntime;

/// Rebuilds an engine on the worker side from a serialized recipe.
///
/// The recipe only carries data (settings path, backend id, model, hook
/// class paths); turning it into live clients and hooks is deployment
/// wiring, so it stays behind this seam.
pub trait RecipeEngineBuilder: Send + Sync {
    fn build(&self, recipe: &RuntimeRecipe) -> anyhow::Result<AgentRuntime>;
}

impl<F> RecipeEngineBuilder for F
where
    F: Fn(&RuntimeRecipe) -> anyhow::Result<AgentRuntime> + Send + Sync,
{
    fn build(&self, recipe: &RuntimeRecipe) -> anyhow::Result<AgentRuntime> {
        self(recipe)
    }
}

/// Worker-side execution of exactly one agent cycle.
///
/// Loads the task's checkpoint, rebuilds the engine from the recipe, runs
/// one cycle, and either deletes the checkpoint (terminal result) or writes
/// the updated one back for the next worker.
pub async fn run_single_cycle(
    task: &AgentTask,
    recipe: &RuntimeRecipe,
    cycle_index: u32,
    store: &dyn StateStore,
    builder: &dyn RecipeEngineBuilder,
) -> anyhow::Result<CycleDispatch> {
    let Some(checkpoint) = store.load_checkpoint(&task.task_id)? else {
        return Ok(CycleDispatch::finished(AgentResult {
            status: AgentStatus::Failed,
            messages: Vec::new(),
            cycles: Vec::new(),
            final_answer: None,
            wait_reason: None,
            error: Some(format!("No checkpoint found for task {}", task.task_id)),
            shared_state: Default::default(),
            token_usage: TaskTokenUsage::default(),
        }));
    };

    let runtime = builder.build(recipe)?;
    let workspace = PathBuf::from(&recipe.workspace);
    std::fs::create_dir_all(&workspace)?;

    let shared = shared_state(Some(checkpoint.shared_state));
    let executor = runtime.build_cycle_executor(task, &workspace, None, None, None, &shared, None);

    let mut state = RunState {
        messages: checkpoint.messages,
        cycles: checkpoint.cycles,
        shared,
    };

    debug!(task_id = %task.task_id, cycle = cycle_index, "worker running one cycle");
    if let Some(result) = executor.run_cycle(cycle_index, &mut state, None).await {
        store.delete_checkpoint(&task.task_id)?;
        return Ok(CycleDispatch::finished(result));
    }

    store.save_checkpoint(&Checkpoint {
        task_id: task.task_id.clone(),
        cycle_index,
        status: AgentStatus::Running,
        messages: state.messages,
        cycles: state.cycles,
        shared_state: state.shared.lock().expect("shared state lock").clone(),
    })?;
    Ok(CycleDispatch::pending())
}

/// Eager broker: runs the cycle worker in-process against a shared state
/// store.  The test and single-host stand-in for a message-queue broker.
pub struct InProcessBroker {
    store: Arc<dyn StateStore>,
    builder: Arc<dyn RecipeEngineBuilder>,
}

impl InProcessBroker {
    pub fn new(store: Arc<dyn StateStore>, builder: Arc<dyn RecipeEngineBuilder>) -> Self {
        Self { store, builder }
    }
}

#[async_trait]
impl CycleBroker for InProcessBroker {
    async fn run_cycle(&self, task: &AgentTask, recipe: &RuntimeRecipe, cycle_index: u32) -> anyhow::Result<CycleDispatch> {
        run_single_cycle(task, recipe, cycle_index, self.store.as_ref(), self.builder.as_ref()).await
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rove_exec::InMemoryStateStore;
    use rove_model::{LlmResponse, ScriptedClient};
    use rove_tools::build_default_registry;
    use rove_types::{Message, StateMap, ToolCall};

    use super::*;

    fn recipe(workspace: &std::path::Path) -> RuntimeRecipe {
        RuntimeRecipe {
            settings_file: "settings.json".into(),
            backend: "test".into(),
            model: "test-model".into(),
            workspace: workspace.display().to_string(),
            timeout_seconds: 90.0,
            hook_class_paths: vec![],
            log_preview_chars: None,
        }
    }

    fn seed_checkpoint(store: &dyn StateStore, task_id: &str) {
        let mut shared = StateMap::new();
        shared.insert("todo_list".into(), json!([]));
        store
            .save_checkpoint(&Checkpoint {
                task_id: task_id.into(),
                cycle_index: 0,
                status: AgentStatus::Running,
                messages: vec![Message::system("sys"), Message::user("go")],
                cycles: vec![],
                shared_state: shared,
            })
            .unwrap();
    }

    fn builder_with(steps: Vec<Vec<LlmResponse>>) -> Arc<dyn RecipeEngineBuilder> {
        // Each build call pops one script, emulating a fresh worker per cycle.
        let scripts = std::sync::Mutex::new(steps);
        Arc::new(move |_recipe: &RuntimeRecipe| {
            let mut scripts = scripts.lock().expect("scripts lock");
            let steps = if scripts.is_empty() { vec![] } else { scripts.remove(0) };
            Ok::<_, anyhow::Error>(AgentRuntime::new(
                Arc::new(ScriptedClient::new(steps)),
                Arc::new(build_default_registry()),
            ))
        })
    }

    #[tokio::test]
    async fn missing_checkpoint_finishes_with_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStateStore::new();
        let task = AgentTask::new("ghost", "test-model", "s", "u");
        let builder = builder_with(vec![]);
        let dispatch = run_single_cycle(&task, &recipe(dir.path()), 1, &store, builder.as_ref())
            .await
            .unwrap();
        assert!(dispatch.finished);
        let result = dispatch.result.unwrap();
        assert_eq!(result.status, AgentStatus::Failed);
        assert!(result.error.unwrap().contains("No checkpoint found"));
    }

    #[tokio::test]
    async fn non_terminal_cycle_updates_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStateStore::new();
        let task = AgentTask::new("worker-1", "test-model", "s", "u");
        seed_checkpoint(&store, "worker-1");
        // One todo_write call: the cycle continues afterwards.
        let builder = builder_with(vec![vec![LlmResponse::text("").with_tool_calls(vec![ToolCall::new(
            "c1",
            "todo_write",
            json!({"todos": [{"title": "step", "status": "completed"}]}),
        )])]]);
        let dispatch = run_single_cycle(&task, &recipe(dir.path()), 1, &store, builder.as_ref())
            .await
            .unwrap();
        assert!(!dispatch.finished);
        let checkpoint = store.load_checkpoint("worker-1").unwrap().expect("updated checkpoint");
        assert_eq!(checkpoint.cycle_index, 1);
        assert_eq!(checkpoint.cycles.len(), 1);
        assert!(checkpoint.messages.len() > 2, "assistant + tool messages appended");
        assert_eq!(checkpoint.shared_state["todo_list"][0]["title"], "step");
    }

    #[tokio::test]
    async fn terminal_cycle_deletes_checkpoint_and_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStateStore::new();
        let task = AgentTask::new("worker-2", "test-model", "s", "u");
        seed_checkpoint(&store, "worker-2");
        let builder = builder_with(vec![vec![LlmResponse::text("").with_tool_calls(vec![ToolCall::new(
            "c1",
            "task_finish",
            json!({"message": "done remotely"}),
        )])]]);
        let dispatch = run_single_cycle(&task, &recipe(dir.path()), 1, &store, builder.as_ref())
            .await
            .unwrap();
        assert!(dispatch.finished);
        assert_eq!(dispatch.result.unwrap().final_answer.as_deref(), Some("done remotely"));
        assert!(store.load_checkpoint("worker-2").unwrap().is_none());
    }
}
