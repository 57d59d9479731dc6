// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The cycle-sharded backend must produce the same terminal result as the
//! inline backend for the same scripted conversation, with every cycle
//! passing through a checkpoint in the state store.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use rove::exec::{InMemoryStateStore, RuntimeRecipe, ShardedBackend, StateStore};
use rove::model::{LlmResponse, ScriptedClient};
use rove::tools::build_default_registry;
use rove::{AgentRuntime, AgentStatus, AgentTask, InProcessBroker, ToolCall};

fn scripted_steps() -> Vec<LlmResponse> {
    vec![
        LlmResponse::text("")
            .with_tool_calls(vec![ToolCall::new(
                "c1",
                "todo_write",
                json!({"todos": [{"id": "t1", "title": "draft", "status": "completed", "priority": "medium"}]}),
            )])
            .with_usage(json!({"prompt_tokens": 50, "completion_tokens": 5})),
        LlmResponse::text("")
            .with_tool_calls(vec![ToolCall::new("c2", "task_finish", json!({"message": "all done"}))])
            .with_usage(json!({"prompt_tokens": 60, "completion_tokens": 6})),
    ]
}

fn base_task() -> AgentTask {
    let mut task = AgentTask::new("round-trip", "test-model", "You are a task agent.", "Get it done.");
    task.max_cycles = 4;
    task
}

/// Blank out wall-clock fields so structurally identical runs compare
/// equal.  Tool-result contents are JSON-encoded strings, so embedded JSON
/// is canonicalized recursively as well.
fn canonicalize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if key == "created_at" || key == "updated_at" {
                    *entry = Value::String(String::new());
                } else {
                    canonicalize(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                canonicalize(item);
            }
        }
        Value::String(text) => {
            if let Ok(mut embedded) = serde_json::from_str::<Value>(text) {
                if embedded.is_object() || embedded.is_array() {
                    canonicalize(&mut embedded);
                    *text = embedded.to_string();
                }
            }
        }
        _ => {}
    }
}

#[tokio::test]
async fn sharded_result_matches_inline_result() {
    let dir = tempfile::tempdir().unwrap();

    // Inline reference run.
    let inline_runtime = AgentRuntime::new(
        Arc::new(ScriptedClient::new(scripted_steps())),
        Arc::new(build_default_registry()),
    )
    .with_default_workspace(dir.path());
    let inline_result = inline_runtime.run(base_task()).await;
    assert_eq!(inline_result.status, AgentStatus::Completed);

    // Sharded run: each cycle is dispatched through the broker, which
    // rebuilds a fresh engine and resumes from the checkpoint.
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let scripts = Mutex::new(scripted_steps());
    let builder = Arc::new(move |_recipe: &RuntimeRecipe| {
        let mut scripts = scripts.lock().expect("scripts lock");
        let step = if scripts.is_empty() { vec![] } else { vec![scripts.remove(0)] };
        Ok::<_, anyhow::Error>(AgentRuntime::new(
            Arc::new(ScriptedClient::new(step)),
            Arc::new(build_default_registry()),
        ))
    });
    let recipe = RuntimeRecipe {
        settings_file: "settings.json".into(),
        backend: "test".into(),
        model: "test-model".into(),
        workspace: dir.path().display().to_string(),
        timeout_seconds: 90.0,
        hook_class_paths: vec![],
        log_preview_chars: None,
    };
    let broker = Arc::new(InProcessBroker::new(Arc::clone(&store), builder));
    let sharded_backend = ShardedBackend::new(broker, Arc::clone(&store), recipe);

    let sharded_runtime = AgentRuntime::new(
        // The driver-side client is never called in distributed mode; the
        // workers own the model conversation.
        Arc::new(ScriptedClient::new(vec![])),
        Arc::new(build_default_registry()),
    )
    .with_default_workspace(dir.path())
    .with_execution_backend(Arc::new(sharded_backend));
    let sharded_result = sharded_runtime.run(base_task()).await;

    assert_eq!(sharded_result.status, AgentStatus::Completed);
    assert_eq!(sharded_result.final_answer.as_deref(), Some("all done"));
    assert_eq!(sharded_result.cycles.len(), 2);

    let mut inline_json = serde_json::to_value(&inline_result).expect("serialize inline");
    let mut sharded_json = serde_json::to_value(&sharded_result).expect("serialize sharded");
    canonicalize(&mut inline_json);
    canonicalize(&mut sharded_json);
    assert_eq!(inline_json, sharded_json, "sharded run must reproduce the inline result");

    // The terminal worker cleaned up its checkpoint.
    assert!(store.load_checkpoint("round-trip").unwrap().is_none());
}
