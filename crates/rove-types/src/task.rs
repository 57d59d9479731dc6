// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::AgentStatus;
use crate::StateMap;

// ─── No-tool policy ───────────────────────────────────────────────────────────

/// What the engine does when a cycle produces no tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoToolPolicy {
    /// Append a continue hint and run the next cycle.
    #[default]
    Continue,
    /// Pause the run and hand control back to the user.
    WaitUser,
    /// Treat the assistant text as the final answer.
    Finish,
}

// ─── Task definitions ─────────────────────────────────────────────────────────

/// Declarative description of one agent run.  Immutable input to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Token budget above which the memory manager starts rewriting history.
    #[serde(default = "default_compact_threshold")]
    pub memory_compact_threshold: u64,
    /// Percentage of the compact threshold at which the optional memory
    /// warning fires (see `rove-memory`).
    #[serde(default = "default_threshold_percentage")]
    pub memory_threshold_percentage: u8,
    #[serde(default)]
    pub no_tool_policy: NoToolPolicy,
    #[serde(default = "default_true")]
    pub allow_interruption: bool,
    #[serde(default = "default_true")]
    pub use_workspace: bool,
    #[serde(default)]
    pub sub_agents: BTreeMap<String, SubAgentConfig>,
    #[serde(default)]
    pub native_multimodal: bool,
    #[serde(default)]
    pub extra_tool_names: Vec<String>,
    #[serde(default)]
    pub exclude_tools: Vec<String>,
    /// Free-form knobs: memory tuning, language, skills, sub-task markers.
    /// Read through the clamped helpers in [`crate::metadata`].
    #[serde(default)]
    pub metadata: StateMap,
}

fn default_max_cycles() -> u32 {
    8
}

fn default_compact_threshold() -> u64 {
    128_000
}

fn default_threshold_percentage() -> u8 {
    90
}

fn default_true() -> bool {
    true
}

impl AgentTask {
    pub fn new(
        task_id: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_cycles: default_max_cycles(),
            memory_compact_threshold: default_compact_threshold(),
            memory_threshold_percentage: default_threshold_percentage(),
            no_tool_policy: NoToolPolicy::Continue,
            allow_interruption: true,
            use_workspace: true,
            sub_agents: BTreeMap::new(),
            native_multimodal: false,
            extra_tool_names: Vec::new(),
            exclude_tools: Vec::new(),
            metadata: StateMap::new(),
        }
    }

    pub fn sub_agents_enabled(&self) -> bool {
        !self.sub_agents.is_empty()
    }
}

/// A named sub-agent a task may delegate to via `create_sub_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentConfig {
    pub model: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default)]
    pub exclude_tools: Vec<String>,
    #[serde(default)]
    pub metadata: StateMap,
}

impl SubAgentConfig {
    pub fn new(model: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            description: description.into(),
            backend: None,
            system_prompt: None,
            max_cycles: default_max_cycles(),
            exclude_tools: Vec::new(),
            metadata: StateMap::new(),
        }
    }
}

// ─── Sub-task request/outcome ─────────────────────────────────────────────────

/// Request to spawn one isolated sub-task, built by the sub-agent tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskRequest {
    pub agent_name: String,
    pub task_description: String,
    #[serde(default)]
    pub output_requirements: String,
    #[serde(default)]
    pub include_main_summary: bool,
    #[serde(default)]
    pub metadata: StateMap,
}

impl SubTaskRequest {
    pub fn new(agent_name: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            task_description: task_description.into(),
            output_requirements: String::new(),
            include_main_summary: false,
            metadata: StateMap::new(),
        }
    }
}

/// Result of a nested engine run, flattened for tool-result transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskOutcome {
    pub task_id: String,
    pub agent_name: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cycles: u32,
    #[serde(default)]
    pub todo_list: Vec<Value>,
    /// Model-resolution info (backend, model id) for observability.
    #[serde(default)]
    pub resolved: BTreeMap<String, String>,
}

impl SubTaskOutcome {
    pub fn failed(task_id: impl Into<String>, agent_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            status: AgentStatus::Failed,
            final_answer: None,
            wait_reason: None,
            error: Some(error.into()),
            cycles: 0,
            todo_list: Vec::new(),
            resolved: BTreeMap::new(),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
