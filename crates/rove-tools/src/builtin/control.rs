// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use rove_types::{StateMap, ToolDirective, ToolExecutionResult};

use crate::builtin::common::{arg_bool, arg_str, get_todo_list};
use crate::context::ToolContext;
use crate::registry::Tool;

/// Signals task completion.  By default it refuses while any todo item is
/// still open, so the model keeps its own plan honest.
pub struct TaskFinishTool;

#[async_trait]
impl Tool for TaskFinishTool {
    fn name(&self) -> &str {
        "task_finish"
    }

    fn description(&self) -> &str {
        "Mark the task as finished and provide the final answer.\n\
         Fails with `todo_incomplete` when todo items are still open, unless\n\
         require_all_todos_completed is set to false."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Final answer delivered to the caller"
                },
                "require_all_todos_completed": {
                    "type": "boolean",
                    "default": true
                },
                "exposed_files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Workspace paths worth surfacing alongside the answer"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let message = arg_str(args, "message").unwrap_or("Task completed").to_string();
        let require_all_done = arg_bool(args, "require_all_todos_completed", true);

        let incomplete: Vec<String> = get_todo_list(ctx)
            .iter()
            .filter_map(|item| {
                let status = item
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                let done_flag = item.get("done").and_then(Value::as_bool).unwrap_or(false);
                if matches!(status.as_str(), "completed" | "done" | "finished") || done_flag {
                    return None;
                }
                Some(
                    item.get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("Untitled TODO")
                        .to_string(),
                )
            })
            .collect();

        if require_all_done && !incomplete.is_empty() {
            return Ok(ToolExecutionResult::error(
                json!({
                    "ok": false,
                    "error": "Cannot finish task while todo items are incomplete",
                    "error_code": "todo_incomplete",
                    "incomplete_todos": incomplete,
                })
                .to_string(),
                "todo_incomplete",
            ));
        }

        debug!(message = %message, "task_finish accepted");
        let mut metadata = StateMap::new();
        metadata.insert("final_message".into(), json!(message));
        if let Some(Value::Array(files)) = args.get("exposed_files") {
            let cleaned: Vec<String> = files
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            metadata.insert("exposed_files".into(), json!(cleaned));
        }

        Ok(ToolExecutionResult::success(json!({"ok": true, "message": message}).to_string())
            .with_directive(ToolDirective::Finish)
            .with_metadata(metadata))
    }
}

/// Pauses the run and hands a structured question back to the caller.
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Pause execution and request user input.\n\
         Optionally offer choices; selection_type is `single` or `multi`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "options": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "selection_type": {
                    "type": "string",
                    "enum": ["single", "multi"],
                    "default": "single"
                },
                "allow_custom_options": {
                    "type": "boolean",
                    "default": false
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let question = arg_str(args, "question").unwrap_or("Need user input").to_string();
        let mut selection_type = arg_str(args, "selection_type").unwrap_or("single");
        if !matches!(selection_type, "single" | "multi") {
            selection_type = "single";
        }
        let allow_custom_options = arg_bool(args, "allow_custom_options", false);

        // Deduplicate options while keeping first-seen order.
        let options: Option<Vec<String>> = match args.get("options") {
            Some(Value::Array(raw)) => {
                let mut seen = std::collections::BTreeSet::new();
                let cleaned: Vec<String> = raw
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty() && seen.insert(s.to_string()))
                    .map(str::to_string)
                    .collect();
                (!cleaned.is_empty()).then_some(cleaned)
            }
            _ => None,
        };

        let mut payload = StateMap::new();
        payload.insert("question".into(), json!(question));
        payload.insert("selection_type".into(), json!(selection_type));
        payload.insert("allow_custom_options".into(), json!(allow_custom_options));
        if let Some(options) = options {
            payload.insert("options".into(), json!(options));
        }

        Ok(
            ToolExecutionResult::success(Value::Object(payload.clone()).to_string())
                .with_directive(ToolDirective::WaitUser)
                .with_metadata(payload),
        )
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
