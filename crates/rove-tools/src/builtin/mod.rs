// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

//! The always-registered tool set: run control (`task_finish`, `ask_user`),
//! todo management, workspace I/O, image loading, and sub-agent delegation.

mod common;
mod control;
mod image;
mod sub_agents;
mod todo;
mod workspace_io;

pub use control::{AskUserTool, TaskFinishTool};
pub use image::ReadImageTool;
pub use sub_agents::{BatchSubTasksTool, CreateSubTaskTool};
pub use todo::{TodoReadTool, TodoWriteTool};
pub use workspace_io::{FileStrReplaceTool, ListFilesTool, ReadFileTool, WorkspaceGrepTool, WriteFileTool};

use crate::registry::ToolRegistry;

/// Registry with every built-in registered.
pub fn build_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(TaskFinishTool);
    registry.register(AskUserTool);
    registry.register(TodoWriteTool);
    registry.register(TodoReadTool);
    registry.register(ListFilesTool);
    registry.register(ReadFileTool);
    registry.register(WriteFileTool);
    registry.register(FileStrReplaceTool);
    registry.register(WorkspaceGrepTool);
    registry.register(ReadImageTool);
    registry.register(CreateSubTaskTool);
    registry.register(BatchSubTasksTool);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_every_builtin() {
        let registry = build_default_registry();
        for name in [
            "task_finish",
            "ask_user",
            "todo_write",
            "todo_read",
            "list_files",
            "read_file",
            "write_file",
            "file_str_replace",
            "workspace_grep",
            "read_image",
            "create_sub_task",
            "batch_sub_tasks",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }
}
