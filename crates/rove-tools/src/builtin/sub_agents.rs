// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use rove_types::{AgentStatus, StateMap, SubTaskRequest, ToolExecutionResult};

use crate::builtin::common::{arg_bool, arg_str};
use crate::context::ToolContext;
use crate::registry::Tool;

fn error(message: &str, error_code: &str) -> ToolExecutionResult {
    let payload = json!({"ok": false, "error": message, "error_code": error_code});
    let metadata = payload.as_object().cloned().unwrap_or_default();
    ToolExecutionResult::error(payload.to_string(), error_code).with_metadata(metadata)
}

fn resolve_agent_name(args: &StateMap) -> String {
    for key in ["agent_name", "agent_id"] {
        if let Some(value) = arg_str(args, key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

fn outcome_payload(outcome: &rove_types::SubTaskOutcome) -> StateMap {
    serde_json::to_value(outcome)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

/// Delegates one focused task to a configured sub-agent and returns its
/// flattened outcome.
pub struct CreateSubTaskTool;

#[async_trait]
impl Tool for CreateSubTaskTool {
    fn name(&self) -> &str {
        "create_sub_task"
    }

    fn description(&self) -> &str {
        "Spawn a configured sub-agent on an isolated task and return its\n\
         final answer.  The sub-agent runs with its own todo list and cannot\n\
         spawn further sub-tasks."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of a sub-agent configured on the task"
                },
                "task_description": { "type": "string" },
                "output_requirements": {
                    "type": "string",
                    "description": "Extra constraints on the sub-agent's final answer"
                },
                "include_main_summary": {
                    "type": "boolean",
                    "default": false,
                    "description": "Share the parent goal and todo snapshot with the sub-agent"
                }
            },
            "required": ["agent_name", "task_description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(runner) = &ctx.sub_task_runner else {
            return Ok(error(
                "Sub-agent runtime is not available for this task",
                "sub_agents_not_enabled",
            ));
        };

        let agent_name = resolve_agent_name(args);
        let task_description = arg_str(args, "task_description").unwrap_or("").trim().to_string();
        if agent_name.is_empty() {
            return Ok(error("`agent_name` is required", "agent_name_required"));
        }
        if task_description.is_empty() {
            return Ok(error("`task_description` is required", "task_description_required"));
        }

        let mut request = SubTaskRequest::new(agent_name.clone(), task_description);
        request.output_requirements = arg_str(args, "output_requirements").unwrap_or("").trim().to_string();
        request.include_main_summary = arg_bool(args, "include_main_summary", false);

        debug!(agent = %agent_name, "dispatching sub-task");
        let outcome = runner.run(request).await;
        let payload = outcome_payload(&outcome);
        let content = Value::Object(payload.clone()).to_string();

        if outcome.status == AgentStatus::Completed {
            return Ok(ToolExecutionResult::success(content).with_metadata(payload));
        }
        let error_code = if outcome.status == AgentStatus::WaitUser {
            "sub_task_wait_user"
        } else {
            "sub_task_failed"
        };
        Ok(ToolExecutionResult::error(content, error_code).with_metadata(payload))
    }
}

/// Fans several task descriptions out to one sub-agent, concurrently when
/// the execution backend supports it.
pub struct BatchSubTasksTool;

#[async_trait]
impl Tool for BatchSubTasksTool {
    fn name(&self) -> &str {
        "batch_sub_tasks"
    }

    fn description(&self) -> &str {
        "Run several independent sub-tasks on one configured sub-agent and\n\
         collect all outcomes.  Items run concurrently when the execution\n\
         backend supports it; ordering between items is not guaranteed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_name": { "type": "string" },
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_description": { "type": "string" },
                            "output_requirements": { "type": "string" }
                        },
                        "required": ["task_description"]
                    },
                    "minItems": 1
                },
                "include_main_summary": { "type": "boolean", "default": false }
            },
            "required": ["agent_name", "tasks"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(runner) = &ctx.sub_task_runner else {
            return Ok(error(
                "Sub-agent runtime is not available for this task",
                "sub_agents_not_enabled",
            ));
        };

        let agent_name = resolve_agent_name(args);
        if agent_name.is_empty() {
            return Ok(error("`agent_name` is required", "agent_name_required"));
        }
        let Some(Value::Array(raw_tasks)) = args.get("tasks") else {
            return Ok(error("`tasks` must be a non-empty array", "invalid_tasks_payload"));
        };
        if raw_tasks.is_empty() {
            return Ok(error("`tasks` must be a non-empty array", "invalid_tasks_payload"));
        }
        let include_main_summary = arg_bool(args, "include_main_summary", false);

        // Validate first; invalid items fail in place without blocking the rest.
        let mut item_errors: Vec<(usize, String)> = Vec::new();
        let mut requests: Vec<(usize, SubTaskRequest)> = Vec::new();
        for (index, item) in raw_tasks.iter().enumerate() {
            let Some(obj) = item.as_object() else {
                item_errors.push((index, "Task item must be an object".into()));
                continue;
            };
            let description = obj
                .get("task_description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if description.is_empty() {
                item_errors.push((index, "`task_description` is required".into()));
                continue;
            }
            let mut request = SubTaskRequest::new(agent_name.clone(), description);
            request.output_requirements = obj
                .get("output_requirements")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            request.include_main_summary = include_main_summary;
            request.metadata.insert("batch_index".into(), json!(index));
            requests.push((index, request));
        }

        debug!(agent = %agent_name, total = raw_tasks.len(), valid = requests.len(), "dispatching batch sub-tasks");
        let outcomes = runner.run_batch(requests).await;
        let outcome_by_index: std::collections::BTreeMap<usize, _> = outcomes.into_iter().collect();

        let mut results: Vec<Value> = Vec::with_capacity(raw_tasks.len());
        let mut completed = 0usize;
        let mut failed = 0usize;
        for index in 0..raw_tasks.len() {
            if let Some((_, message)) = item_errors.iter().find(|(i, _)| *i == index) {
                failed += 1;
                results.push(json!({"index": index, "status": "failed", "error": message}));
                continue;
            }
            match outcome_by_index.get(&index) {
                Some(outcome) => {
                    if outcome.status == AgentStatus::Completed {
                        completed += 1;
                    } else {
                        failed += 1;
                    }
                    let mut payload = outcome_payload(outcome);
                    payload.insert("index".into(), json!(index));
                    results.push(Value::Object(payload));
                }
                None => {
                    failed += 1;
                    results.push(json!({"index": index, "status": "failed", "error": "sub-task produced no outcome"}));
                }
            }
        }

        let payload = json!({
            "summary": {"total": raw_tasks.len(), "completed": completed, "failed": failed},
            "results": results,
        });
        let metadata = payload.as_object().cloned().unwrap_or_default();
        if completed == 0 {
            return Ok(
                ToolExecutionResult::error(payload.to_string(), "batch_sub_tasks_failed").with_metadata(metadata),
            );
        }
        Ok(ToolExecutionResult::success(payload.to_string()).with_metadata(metadata))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
