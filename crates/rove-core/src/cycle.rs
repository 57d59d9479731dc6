// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::Arc;

use rove_exec::ExecutionContext;
use rove_memory::MemoryManager;
use rove_model::{CompletionParams, LlmClient, LlmError};
use rove_tools::{plan_tool_schemas, ToolRegistry};
use rove_types::{normalize_token_usage, AgentTask, CycleRecord, Message, SharedState};

use crate::hooks::HookManager;

/// Performs one LLM round-trip: compaction, schema planning, hook-mediated
/// model call, and normalization of the assistant turn.
pub struct CycleRunner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookManager>,
}

impl CycleRunner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, hooks: Arc<HookManager>) -> Self {
        Self { llm, registry, hooks }
    }

    /// Run one cycle.  Returns the updated message list (compacted history
    /// plus the new assistant turn) and the cycle record; the record's
    /// `tool_calls` still await execution by the tool-call runner.
    ///
    /// An LLM failure propagates as an error; the engine converts it into a
    /// failed run.  No retries happen here.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_cycle(
        &self,
        task: &AgentTask,
        messages: &[Message],
        cycle_index: u32,
        memory: &MemoryManager,
        previous_total_tokens: Option<u64>,
        recent_tool_call_ids: Option<&HashSet<String>>,
        shared: &SharedState,
        ctx: Option<&ExecutionContext>,
    ) -> Result<(Vec<Message>, CycleRecord), LlmError> {
        let shared_snapshot = shared.lock().expect("shared state lock").clone();

        let pre_compact = self
            .hooks
            .apply_before_memory_compact(task, cycle_index, messages.to_vec(), &shared_snapshot)
            .await;
        let (compacted, memory_compacted) = memory
            .compact(&pre_compact, previous_total_tokens, recent_tool_call_ids, Some(cycle_index))
            .await;

        let schemas = plan_tool_schemas(&self.registry, task);
        let (mut next_messages, schemas) = self
            .hooks
            .apply_before_llm(task, cycle_index, compacted, schemas, &shared_snapshot)
            .await;

        let response = self
            .llm
            .complete(CompletionParams {
                model: &task.model,
                messages: &next_messages,
                tools: &schemas,
                stream_callback: ctx.and_then(|c| c.stream_callback.clone()),
            })
            .await?;
        let response = self
            .hooks
            .apply_after_llm(task, cycle_index, &next_messages, &schemas, response, &shared_snapshot)
            .await;

        let mut assistant = Message::assistant(response.content.clone());
        if !response.tool_calls.is_empty() {
            assistant.tool_calls = Some(response.tool_calls.iter().map(|c| c.to_assistant_entry()).collect());
        }
        if let Some(reasoning) = &response.reasoning_content {
            if !reasoning.is_empty() {
                assistant.reasoning_content = Some(reasoning.clone());
            }
        }
        next_messages.push(assistant);

        let mut record = CycleRecord::new(cycle_index, response.content.clone());
        record.tool_calls = response.tool_calls.clone();
        record.memory_compacted = memory_compacted;
        record.token_usage = normalize_token_usage(response.usage());
        Ok((next_messages, record))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rove_model::{LlmResponse, ScriptedClient};
    use rove_tools::build_default_registry;
    use rove_types::{shared_state, Role, ToolCall};

    use super::*;

    fn runner(steps: Vec<LlmResponse>) -> CycleRunner {
        CycleRunner::new(
            Arc::new(ScriptedClient::new(steps)),
            Arc::new(build_default_registry()),
            Arc::new(HookManager::default()),
        )
    }

    fn base_messages() -> Vec<Message> {
        vec![Message::system("sys"), Message::user("do the thing")]
    }

    #[tokio::test]
    async fn appends_assistant_turn_and_records_usage() {
        let runner = runner(vec![LlmResponse::text("thinking out loud")
            .with_usage(json!({"prompt_tokens": 12, "completion_tokens": 3}))]);
        let memory = MemoryManager::new(1_000_000);
        let shared = shared_state(None);
        let task = AgentTask::new("t", "m", "sys", "u");

        let (messages, record) = runner
            .run_cycle(&task, &base_messages(), 1, &memory, None, None, &shared, None)
            .await
            .unwrap();

        assert_eq!(messages.len(), 3);
        let assistant = messages.last().unwrap();
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "thinking out loud");
        assert!(assistant.tool_calls.is_none());
        assert_eq!(record.index, 1);
        assert_eq!(record.token_usage.total_tokens, 15);
        assert!(!record.memory_compacted);
    }

    #[tokio::test]
    async fn tool_calls_land_on_assistant_message_and_record() {
        let call = ToolCall::new("c1", "todo_read", json!({}));
        let runner = runner(vec![LlmResponse::text("").with_tool_calls(vec![call.clone()])]);
        let memory = MemoryManager::new(1_000_000);
        let shared = shared_state(None);
        let task = AgentTask::new("t", "m", "sys", "u");

        let (messages, record) = runner
            .run_cycle(&task, &base_messages(), 1, &memory, None, None, &shared, None)
            .await
            .unwrap();

        let assistant = messages.last().unwrap();
        let entries = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "c1");
        assert_eq!(entries[0].function.name, "todo_read");
        assert_eq!(record.tool_calls, vec![call]);
    }

    #[tokio::test]
    async fn llm_failure_propagates() {
        // Strict client errors once the script is exhausted.
        let strict = CycleRunner::new(
            Arc::new(ScriptedClient::new(vec![]).strict("boom")),
            Arc::new(build_default_registry()),
            Arc::new(HookManager::default()),
        );
        let memory = MemoryManager::new(1_000_000);
        let shared = shared_state(None);
        let task = AgentTask::new("t", "m", "sys", "u");
        let err = strict
            .run_cycle(&task, &base_messages(), 2, &memory, None, None, &shared, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn reasoning_content_is_preserved() {
        let mut step = LlmResponse::text("answer");
        step.reasoning_content = Some("step by step".into());
        let runner = runner(vec![step]);
        let memory = MemoryManager::new(1_000_000);
        let shared = shared_state(None);
        let task = AgentTask::new("t", "m", "sys", "u");
        let (messages, _) = runner
            .run_cycle(&task, &base_messages(), 1, &memory, None, None, &shared, None)
            .await
            .unwrap();
        assert_eq!(messages.last().unwrap().reasoning_content.as_deref(), Some("step by step"));
    }
}
