// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;

use serde_json::Value;

use rove_types::AgentTask;

use crate::registry::ToolRegistry;
use crate::{ASK_USER_TOOL, BATCH_SUB_TASKS_TOOL, CREATE_SUB_TASK_TOOL, DEFAULT_WORKSPACE_TOOLS, TASK_FINISH_TOOL};

/// Tool schemas offered to the model for one cycle.
///
/// The planned set is `(default workspace tools ∪ extra_tool_names −
/// exclude_tools) ∪ directive tools`, restricted to registered tools and
/// sorted by name.  Sub-agent tools join only when the task configures
/// sub-agents.  Directive tools cannot be excluded: without `task_finish`
/// the loop could never signal completion.  The planner is deterministic;
/// memory pressure never changes the offered set.
pub fn plan_tool_schemas(registry: &ToolRegistry, task: &AgentTask) -> Vec<Value> {
    let excluded: BTreeSet<&str> = task.exclude_tools.iter().map(String::as_str).collect();

    let mut planned: BTreeSet<&str> = BTreeSet::new();
    for name in DEFAULT_WORKSPACE_TOOLS {
        if !excluded.contains(name) {
            planned.insert(name);
        }
    }
    for name in &task.extra_tool_names {
        if !excluded.contains(name.as_str()) {
            planned.insert(name.as_str());
        }
    }
    if task.sub_agents_enabled() {
        for name in [CREATE_SUB_TASK_TOOL, BATCH_SUB_TASKS_TOOL] {
            if !excluded.contains(name) {
                planned.insert(name);
            }
        }
    }
    planned.insert(TASK_FINISH_TOOL);
    planned.insert(ASK_USER_TOOL);

    planned
        .into_iter()
        .filter_map(|name| registry.schema_for(name))
        .collect()
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
