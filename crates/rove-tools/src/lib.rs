// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! Tool registry, dispatcher, schema planner, and the built-in tool set.
//!
//! Tools receive a [`ToolContext`] (workspace access, shared state, cycle
//! index, optional sub-task runner) and return a
//! [`rove_types::ToolExecutionResult`] whose *directive* steers the engine:
//! `continue`, `wait_user`, or `finish`.

pub mod builtin;
mod context;
mod dispatcher;
mod planner;
mod registry;

pub use builtin::build_default_registry;
pub use context::{SubTaskRunner, ToolContext};
pub use dispatcher::dispatch_tool_call;
pub use planner::plan_tool_schemas;
pub use registry::{Tool, ToolRegistry};

/// Directive tool names: always available, never excludable.
pub const TASK_FINISH_TOOL: &str = "task_finish";
pub const ASK_USER_TOOL: &str = "ask_user";

/// Sub-agent tool names: planned only for tasks with configured sub-agents,
/// and always stripped from the sub-agents' own tool sets.
pub const CREATE_SUB_TASK_TOOL: &str = "create_sub_task";
pub const BATCH_SUB_TASKS_TOOL: &str = "batch_sub_tasks";

/// Workspace tools offered to every task unless excluded.
pub const DEFAULT_WORKSPACE_TOOLS: [&str; 8] = [
    "todo_read",
    "todo_write",
    "list_files",
    "read_file",
    "write_file",
    "file_str_replace",
    "workspace_grep",
    "read_image",
];
