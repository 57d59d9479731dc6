// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use rove_types::{StateMap, ToolExecutionResult};

use crate::builtin::common::get_todo_list;
use crate::context::ToolContext;
use crate::registry::Tool;

const ALLOWED_STATUS: [&str; 3] = ["pending", "in_progress", "completed"];
const ALLOWED_PRIORITY: [&str; 3] = ["low", "medium", "high"];

fn error(message: String, error_code: &str) -> ToolExecutionResult {
    ToolExecutionResult::error(
        json!({"error": message, "error_code": error_code}).to_string(),
        error_code,
    )
}

/// Replaces the run's todo list wholesale.
///
/// Items carry `{id, title, status, priority, created_at, updated_at}`.
/// `created_at` survives for ids that already exist; at most one item may
/// be `in_progress` at a time.
pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the task's todo list.\n\
         Statuses: pending, in_progress (only ONE at a time), completed.\n\
         Mark items completed immediately after finishing them; calling\n\
         todo_write replaces the entire list rather than merging."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Full todo list (replaces the existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "title": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"],
                                "default": "pending"
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["low", "medium", "high"],
                                "default": "medium"
                            }
                        },
                        "required": ["title"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(Value::Array(todos)) = args.get("todos") else {
            return Ok(error("`todos` must be an array".into(), "invalid_todos_payload"));
        };

        let existing = get_todo_list(ctx);
        let created_at_by_id: std::collections::BTreeMap<String, String> = existing
            .iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_str)?;
                let created = item.get("created_at").and_then(Value::as_str)?;
                Some((id.to_string(), created.to_string()))
            })
            .collect();

        let now = Utc::now().to_rfc3339();
        let mut new_list: Vec<Value> = Vec::with_capacity(todos.len());

        for (index, item) in todos.iter().enumerate() {
            let Some(obj) = item.as_object() else {
                return Ok(error(
                    format!("TODO item at index {index} must be an object"),
                    "invalid_todo_item",
                ));
            };

            let title = obj.get("title").and_then(Value::as_str).unwrap_or("").trim().to_string();
            if title.is_empty() {
                return Ok(error(
                    format!("TODO item at index {index} is missing `title`"),
                    "todo_title_required",
                ));
            }

            let status = obj
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("pending")
                .to_lowercase();
            if !ALLOWED_STATUS.contains(&status.as_str()) {
                return Ok(error(
                    format!("TODO item {title} has invalid status {status}"),
                    "invalid_todo_status",
                ));
            }

            let priority = obj
                .get("priority")
                .and_then(Value::as_str)
                .unwrap_or("medium")
                .to_lowercase();
            if !ALLOWED_PRIORITY.contains(&priority.as_str()) {
                return Ok(error(
                    format!("TODO item {title} has invalid priority {priority}"),
                    "invalid_todo_priority",
                ));
            }

            let id = match obj.get("id").and_then(Value::as_str).map(str::trim) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => Uuid::new_v4().simple().to_string()[..8].to_string(),
            };
            let created_at = created_at_by_id.get(&id).cloned().unwrap_or_else(|| now.clone());

            new_list.push(json!({
                "id": id,
                "title": title,
                "status": status,
                "priority": priority,
                "created_at": created_at,
                "updated_at": now,
            }));
        }

        let in_progress = new_list
            .iter()
            .filter(|item| item.get("status").and_then(Value::as_str) == Some("in_progress"))
            .count();
        if in_progress > 1 {
            return Ok(error(
                "Only one TODO item can be in_progress at a time".into(),
                "multiple_in_progress_todos",
            ));
        }

        debug!(count = new_list.len(), "todo list replaced");
        let count = new_list.len();
        ctx.update_shared(|shared| {
            shared.insert("todo_list".into(), Value::Array(new_list.clone()));
        });

        Ok(ToolExecutionResult::success(
            json!({
                "action": "write",
                "todos": new_list,
                "count": count,
                "message": format!("TODO list updated successfully with {count} items"),
            })
            .to_string(),
        ))
    }
}

/// Reads the current todo list.
pub struct TodoReadTool;

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the task's current todo list."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &ToolContext, _args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let todos = get_todo_list(ctx);
        Ok(ToolExecutionResult::success(
            json!({"action": "read", "todos": todos, "count": todos.len()}).to_string(),
        ))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
