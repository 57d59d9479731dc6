// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use rove_model::LlmResponse;
use rove_types::{AgentTask, Message, StateMap, ToolCall, ToolExecutionResult};

// ─── Events ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BeforeMemoryCompactEvent {
    pub task: AgentTask,
    pub cycle_index: u32,
    pub messages: Vec<Message>,
    pub shared_state: StateMap,
}

#[derive(Clone)]
pub struct BeforeLlmEvent {
    pub task: AgentTask,
    pub cycle_index: u32,
    pub messages: Vec<Message>,
    pub tool_schemas: Vec<Value>,
    pub shared_state: StateMap,
}

#[derive(Clone)]
pub struct AfterLlmEvent {
    pub task: AgentTask,
    pub cycle_index: u32,
    pub messages: Vec<Message>,
    pub tool_schemas: Vec<Value>,
    pub response: LlmResponse,
    pub shared_state: StateMap,
}

#[derive(Clone)]
pub struct BeforeToolCallEvent {
    pub task: AgentTask,
    pub cycle_index: u32,
    pub call: ToolCall,
    pub shared_state: StateMap,
}

#[derive(Clone)]
pub struct AfterToolCallEvent {
    pub task: AgentTask,
    pub cycle_index: u32,
    pub call: ToolCall,
    pub result: ToolExecutionResult,
    pub shared_state: StateMap,
}

// ─── Patches ──────────────────────────────────────────────────────────────────

/// Replacement payload for `before_llm`.  A `None` field keeps the current
/// value.
#[derive(Default, Clone)]
pub struct BeforeLlmPatch {
    pub messages: Option<Vec<Message>>,
    pub tool_schemas: Option<Vec<Value>>,
}

/// What a `before_tool_call` hook may do with a pending call.
///
/// `ReplaceCall` mutates the call and lets later hooks (and dispatch) see
/// the replacement; `ShortCircuit` skips dispatch entirely; `Patch` applies
/// either field, and a present `result` also short-circuits.
#[derive(Clone)]
pub enum ToolCallHookAction {
    ReplaceCall(ToolCall),
    ShortCircuit(ToolExecutionResult),
    Patch {
        call: Option<ToolCall>,
        result: Option<ToolExecutionResult>,
    },
}

// ─── Hook trait ───────────────────────────────────────────────────────────────

/// Interception points around model calls, tool calls, and compaction.
/// Override only what you need; every default is a no-op.  The manager
/// never swallows panics or reorders hooks.
#[async_trait]
pub trait RuntimeHook: Send + Sync {
    async fn before_memory_compact(&self, _event: &BeforeMemoryCompactEvent) -> Option<Vec<Message>> {
        None
    }

    async fn before_llm(&self, _event: &BeforeLlmEvent) -> Option<BeforeLlmPatch> {
        None
    }

    async fn after_llm(&self, _event: &AfterLlmEvent) -> Option<LlmResponse> {
        None
    }

    async fn before_tool_call(&self, _event: &BeforeToolCallEvent) -> Option<ToolCallHookAction> {
        None
    }

    async fn after_tool_call(&self, _event: &AfterToolCallEvent) -> Option<ToolExecutionResult> {
        None
    }
}

// ─── Manager ──────────────────────────────────────────────────────────────────

/// Ordered hook invocation: first-to-last, later hooks observing earlier
/// hooks' mutations.
#[derive(Default, Clone)]
pub struct HookManager {
    hooks: Vec<Arc<dyn RuntimeHook>>,
}

impl HookManager {
    pub fn new(hooks: Vec<Arc<dyn RuntimeHook>>) -> Self {
        Self { hooks }
    }

    pub fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }

    pub async fn apply_before_memory_compact(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        messages: Vec<Message>,
        shared_state: &StateMap,
    ) -> Vec<Message> {
        let mut current = messages;
        for hook in &self.hooks {
            let event = BeforeMemoryCompactEvent {
                task: task.clone(),
                cycle_index,
                messages: current.clone(),
                shared_state: shared_state.clone(),
            };
            if let Some(replacement) = hook.before_memory_compact(&event).await {
                current = replacement;
            }
        }
        current
    }

    pub async fn apply_before_llm(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        messages: Vec<Message>,
        tool_schemas: Vec<Value>,
        shared_state: &StateMap,
    ) -> (Vec<Message>, Vec<Value>) {
        let mut current_messages = messages;
        let mut current_schemas = tool_schemas;
        for hook in &self.hooks {
            let event = BeforeLlmEvent {
                task: task.clone(),
                cycle_index,
                messages: current_messages.clone(),
                tool_schemas: current_schemas.clone(),
                shared_state: shared_state.clone(),
            };
            if let Some(patch) = hook.before_llm(&event).await {
                if let Some(messages) = patch.messages {
                    current_messages = messages;
                }
                if let Some(schemas) = patch.tool_schemas {
                    current_schemas = schemas;
                }
            }
        }
        (current_messages, current_schemas)
    }

    pub async fn apply_after_llm(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        messages: &[Message],
        tool_schemas: &[Value],
        response: LlmResponse,
        shared_state: &StateMap,
    ) -> LlmResponse {
        let mut current = response;
        for hook in &self.hooks {
            let event = AfterLlmEvent {
                task: task.clone(),
                cycle_index,
                messages: messages.to_vec(),
                tool_schemas: tool_schemas.to_vec(),
                response: current.clone(),
                shared_state: shared_state.clone(),
            };
            if let Some(replacement) = hook.after_llm(&event).await {
                current = replacement;
            }
        }
        current
    }

    /// Returns the (possibly replaced) call and an optional short-circuit
    /// result.  A short-circuit stops the chain immediately.
    pub async fn apply_before_tool_call(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        call: ToolCall,
        shared_state: &StateMap,
    ) -> (ToolCall, Option<ToolExecutionResult>) {
        let mut current_call = call;
        for hook in &self.hooks {
            let event = BeforeToolCallEvent {
                task: task.clone(),
                cycle_index,
                call: current_call.clone(),
                shared_state: shared_state.clone(),
            };
            match hook.before_tool_call(&event).await {
                None => {}
                Some(ToolCallHookAction::ReplaceCall(call)) => current_call = call,
                Some(ToolCallHookAction::ShortCircuit(result)) => return (current_call, Some(result)),
                Some(ToolCallHookAction::Patch { call, result }) => {
                    if let Some(call) = call {
                        current_call = call;
                    }
                    if let Some(result) = result {
                        return (current_call, Some(result));
                    }
                }
            }
        }
        (current_call, None)
    }

    pub async fn apply_after_tool_call(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        call: &ToolCall,
        result: ToolExecutionResult,
        shared_state: &StateMap,
    ) -> ToolExecutionResult {
        let mut current = result;
        for hook in &self.hooks {
            let event = AfterToolCallEvent {
                task: task.clone(),
                cycle_index,
                call: call.clone(),
                result: current.clone(),
                shared_state: shared_state.clone(),
            };
            if let Some(replacement) = hook.after_tool_call(&event).await {
                current = replacement;
            }
        }
        current
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn task() -> AgentTask {
        AgentTask::new("t", "m", "sys", "user")
    }

    struct AppendMarkerHook(&'static str);

    #[async_trait]
    impl RuntimeHook for AppendMarkerHook {
        async fn before_llm(&self, event: &BeforeLlmEvent) -> Option<BeforeLlmPatch> {
            let mut messages = event.messages.clone();
            messages.push(Message::user(self.0));
            Some(BeforeLlmPatch {
                messages: Some(messages),
                tool_schemas: None,
            })
        }
    }

    struct RenameCallHook;

    #[async_trait]
    impl RuntimeHook for RenameCallHook {
        async fn before_tool_call(&self, event: &BeforeToolCallEvent) -> Option<ToolCallHookAction> {
            let mut call = event.call.clone();
            call.name = format!("{}_renamed", call.name);
            Some(ToolCallHookAction::ReplaceCall(call))
        }
    }

    struct BlockIfRenamedHook;

    #[async_trait]
    impl RuntimeHook for BlockIfRenamedHook {
        async fn before_tool_call(&self, event: &BeforeToolCallEvent) -> Option<ToolCallHookAction> {
            if event.call.name.ends_with("_renamed") {
                return Some(ToolCallHookAction::ShortCircuit(ToolExecutionResult::error(
                    "{}",
                    "blocked_by_hook",
                )));
            }
            None
        }
    }

    #[tokio::test]
    async fn before_llm_hooks_stack_in_order() {
        let manager = HookManager::new(vec![
            Arc::new(AppendMarkerHook("first")),
            Arc::new(AppendMarkerHook("second")),
        ]);
        let (messages, _) = manager
            .apply_before_llm(&task(), 1, vec![Message::system("s")], vec![], &StateMap::new())
            .await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].content, "second");
    }

    #[tokio::test]
    async fn later_hook_sees_earlier_replacement() {
        let manager = HookManager::new(vec![Arc::new(RenameCallHook), Arc::new(BlockIfRenamedHook)]);
        let call = ToolCall::new("c1", "read_file", json!({}));
        let (patched, short_circuit) = manager
            .apply_before_tool_call(&task(), 1, call, &StateMap::new())
            .await;
        assert_eq!(patched.name, "read_file_renamed");
        assert_eq!(
            short_circuit.unwrap().error_code.as_deref(),
            Some("blocked_by_hook"),
            "second hook must observe the rename made by the first"
        );
    }

    #[tokio::test]
    async fn short_circuit_stops_the_chain() {
        struct CountingHook(std::sync::Arc<std::sync::atomic::AtomicU32>);

        #[async_trait]
        impl RuntimeHook for CountingHook {
            async fn before_tool_call(&self, _event: &BeforeToolCallEvent) -> Option<ToolCallHookAction> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                None
            }
        }

        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let manager = HookManager::new(vec![
            Arc::new(BlockIfRenamedHook),
            Arc::new(RenameCallHook),
            Arc::new(CountingHook(std::sync::Arc::clone(&counter))),
        ]);
        // The first hook short-circuits on the pre-renamed name, so neither
        // the rename hook nor the counter ever runs.
        let call = ToolCall::new("c1", "x_renamed", json!({}));
        let (_, short_circuit) = manager
            .apply_before_tool_call(&task(), 1, call, &StateMap::new())
            .await;
        assert!(short_circuit.is_some());
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0, "hooks after a short-circuit never run");
    }

    #[tokio::test]
    async fn after_llm_replaces_response_wholesale() {
        struct ForceFinishHook;

        #[async_trait]
        impl RuntimeHook for ForceFinishHook {
            async fn after_llm(&self, _event: &AfterLlmEvent) -> Option<LlmResponse> {
                Some(LlmResponse::text("").with_tool_calls(vec![ToolCall::new(
                    "forced",
                    "task_finish",
                    json!({"message": "budget exhausted"}),
                )]))
            }
        }

        let manager = HookManager::new(vec![Arc::new(ForceFinishHook)]);
        let response = manager
            .apply_after_llm(&task(), 1, &[], &[], LlmResponse::text("original"), &StateMap::new())
            .await;
        assert_eq!(response.tool_calls[0].name, "task_finish");
    }

    #[tokio::test]
    async fn compact_hook_replaces_message_list() {
        struct DropAllHook;

        #[async_trait]
        impl RuntimeHook for DropAllHook {
            async fn before_memory_compact(&self, event: &BeforeMemoryCompactEvent) -> Option<Vec<Message>> {
                Some(event.messages[..1].to_vec())
            }
        }

        let manager = HookManager::new(vec![Arc::new(DropAllHook)]);
        let messages = vec![Message::system("s"), Message::user("u")];
        let replaced = manager
            .apply_before_memory_compact(&task(), 1, messages, &StateMap::new())
            .await;
        assert_eq!(replaced.len(), 1);
    }

    #[tokio::test]
    async fn empty_manager_passes_values_through() {
        let manager = HookManager::default();
        assert!(!manager.has_hooks());
        let call = ToolCall::new("c", "t", json!({}));
        let (patched, short) = manager
            .apply_before_tool_call(&task(), 1, call.clone(), &StateMap::new())
            .await;
        assert_eq!(patched, call);
        assert!(short.is_none());
    }
}
