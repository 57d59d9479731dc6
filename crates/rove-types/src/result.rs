// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::tool::{ToolCall, ToolExecutionResult};
use crate::usage::{TaskTokenUsage, TokenUsage};
use crate::StateMap;

// ─── Run status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    WaitUser,
    Completed,
    Failed,
    MaxCycles,
}

// ─── Cycle record ─────────────────────────────────────────────────────────────

/// One reason–act iteration: the assistant turn plus the tool calls it
/// requested and the results they produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub index: u32,
    pub assistant_message: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolExecutionResult>,
    #[serde(default)]
    pub memory_compacted: bool,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl CycleRecord {
    pub fn new(index: u32, assistant_message: impl Into<String>) -> Self {
        Self {
            index,
            assistant_message: assistant_message.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            memory_compacted: false,
            token_usage: TokenUsage::default(),
        }
    }
}

// ─── Run result ───────────────────────────────────────────────────────────────

/// Terminal outcome of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub shared_state: StateMap,
    #[serde(default)]
    pub token_usage: TaskTokenUsage,
}

impl AgentResult {
    /// The `todo_list` entry of the shared state, empty when absent or not
    /// an array.
    pub fn todo_list(&self) -> Vec<Value> {
        match self.shared_state.get("todo_list") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

// ─── Checkpoint ───────────────────────────────────────────────────────────────

/// Serialized snapshot passed between distributed cycle workers.
///
/// Save-then-load through a state store must round-trip every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub cycle_index: u32,
    pub status: AgentStatus,
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    pub shared_state: StateMap,
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::usage::normalize_token_usage;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AgentStatus::MaxCycles).unwrap(), r#""max_cycles""#);
        assert_eq!(serde_json::to_string(&AgentStatus::WaitUser).unwrap(), r#""wait_user""#);
    }

    #[test]
    fn todo_list_defaults_to_empty() {
        let result = AgentResult {
            status: AgentStatus::Completed,
            messages: vec![],
            cycles: vec![],
            final_answer: None,
            wait_reason: None,
            error: None,
            shared_state: StateMap::new(),
            token_usage: TaskTokenUsage::default(),
        };
        assert!(result.todo_list().is_empty());
    }

    #[test]
    fn todo_list_reads_array_entry() {
        let mut shared = StateMap::new();
        shared.insert("todo_list".into(), json!([{"id": "a", "title": "t", "status": "pending"}]));
        let result = AgentResult {
            status: AgentStatus::Completed,
            messages: vec![],
            cycles: vec![],
            final_answer: None,
            wait_reason: None,
            error: None,
            shared_state: shared,
            token_usage: TaskTokenUsage::default(),
        };
        assert_eq!(result.todo_list().len(), 1);
    }

    fn sample_checkpoint() -> Checkpoint {
        let mut record = CycleRecord::new(1, "working");
        record.tool_calls.push(ToolCall::new("c1", "todo_read", json!({})));
        record
            .tool_results
            .push(ToolExecutionResult::success(r#"{"todos":[]}"#));
        record.token_usage = normalize_token_usage(&json!({"prompt_tokens": 9, "completion_tokens": 1}));
        record.memory_compacted = true;

        let mut shared = StateMap::new();
        shared.insert("todo_list".into(), json!([]));
        shared.insert("custom".into(), json!({"nested": [1, 2, 3]}));

        Checkpoint {
            task_id: "t1".into(),
            cycle_index: 1,
            status: AgentStatus::Running,
            messages: vec![Message::system("sys"), Message::user("hi"), Message::assistant("working")],
            cycles: vec![record],
            shared_state: shared,
        }
    }

    #[test]
    fn checkpoint_round_trips_every_field() {
        let checkpoint = sample_checkpoint();
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
    }

    #[test]
    fn cycle_record_round_trip_preserves_token_usage() {
        let checkpoint = sample_checkpoint();
        let json = serde_json::to_string(&checkpoint.cycles[0]).unwrap();
        let back: CycleRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token_usage.total_tokens, 10);
        assert!(back.memory_compacted);
    }

    #[test]
    fn agent_result_round_trip() {
        let result = AgentResult {
            status: AgentStatus::WaitUser,
            messages: vec![Message::user("hi")],
            cycles: vec![],
            final_answer: None,
            wait_reason: Some("confirm?".into()),
            error: None,
            shared_state: StateMap::new(),
            token_usage: TaskTokenUsage::default(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: AgentResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
