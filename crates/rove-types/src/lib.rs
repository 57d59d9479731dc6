// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Value objects shared by every runtime crate.
//!
//! Everything here is plain serde-serializable data: messages, tool calls
//! and results, cycle records, token usage, task definitions, run results
//! and checkpoints.  The runtime treats these as immutable once stored; the
//! only sanctioned in-place mutation happens while a `CycleRecord` is being
//! assembled and when `shared_state` is updated between cycles.

mod message;
mod metadata;
mod result;
mod task;
mod tool;
mod usage;

pub use message::{AssistantToolCall, FunctionCall, Message, Role};
pub use metadata::{read_bool, read_str, read_u64};
pub use result::{AgentResult, AgentStatus, Checkpoint, CycleRecord};
pub use task::{AgentTask, NoToolPolicy, SubAgentConfig, SubTaskOutcome, SubTaskRequest};
pub use tool::{ToolCall, ToolDirective, ToolExecutionResult, ToolResultStatus};
pub use usage::{normalize_token_usage, summarize_task_token_usage, CycleTokenUsage, TaskTokenUsage, TokenUsage};

use std::sync::{Arc, Mutex};

/// The per-run mutable mapping that travels through every tool call.
///
/// Always contains a `todo_list` entry once a run has started.  Within a
/// single run it is only touched from one task at a time (the cycle loop is
/// sequential), but sub-task fan-out and sessions share it across tasks, so
/// it is guarded by a mutex.
pub type StateMap = serde_json::Map<String, serde_json::Value>;
pub type SharedState = Arc<Mutex<StateMap>>;

/// Build a fresh shared state from an optional seed map.
pub fn shared_state(seed: Option<StateMap>) -> SharedState {
    Arc::new(Mutex::new(seed.unwrap_or_default()))
}

/// Callback invoked with each streamed text chunk from the model.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;
