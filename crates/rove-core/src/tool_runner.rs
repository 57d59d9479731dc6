// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::json;

use rove_exec::{Cancelled, ExecutionContext};
use rove_tools::{dispatch_tool_call, ToolContext, ToolRegistry};
use rove_types::{
    AgentTask, CycleRecord, Message, ToolCall, ToolDirective, ToolExecutionResult, ToolResultStatus,
};

use crate::engine::InterruptionProvider;
use crate::hooks::HookManager;

/// Outcome of executing one cycle's tool calls.
pub struct ToolRunOutcome {
    /// The terminal (`finish`/`wait_user`) result, if any call produced one.
    pub directive_result: Option<ToolExecutionResult>,
    /// Steering messages drained mid-cycle, to be inserted before the next
    /// model call.
    pub interruption_messages: Vec<Message>,
}

/// Executes the assistant's requested tool calls in emitted order under
/// hook interception.
pub struct ToolCallRunner {
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookManager>,
}

impl ToolCallRunner {
    pub fn new(registry: Arc<ToolRegistry>, hooks: Arc<HookManager>) -> Self {
        Self { registry, hooks }
    }

    /// Run every call, appending tool messages to `messages` and results to
    /// `cycle_record`.  A terminal directive or a drained steering message
    /// skips the remaining calls with deterministic error codes.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        task: &AgentTask,
        tool_calls: &[ToolCall],
        context: &ToolContext,
        messages: &mut Vec<Message>,
        cycle_record: &mut CycleRecord,
        interruption_provider: Option<&InterruptionProvider>,
        on_tool_result: &(dyn Fn(&ToolCall, &ToolExecutionResult) + Sync),
        ctx: Option<&ExecutionContext>,
    ) -> Result<ToolRunOutcome, Cancelled> {
        let mut outcome = ToolRunOutcome {
            directive_result: None,
            interruption_messages: Vec::new(),
        };

        for (index, call) in tool_calls.iter().enumerate() {
            if let Some(ctx) = ctx {
                ctx.check_cancelled()?;
            }

            let shared_snapshot = context.shared_snapshot();
            let (patched_call, short_circuit) = self
                .hooks
                .apply_before_tool_call(task, context.cycle_index, call.clone(), &shared_snapshot)
                .await;

            let mut result = match short_circuit {
                Some(mut result) => {
                    if result.tool_call_id.is_empty() {
                        result.tool_call_id = patched_call.id.clone();
                    }
                    result
                }
                None => dispatch_tool_call(&self.registry, context, &patched_call).await,
            };
            result = self
                .hooks
                .apply_after_tool_call(task, context.cycle_index, &patched_call, result, &shared_snapshot)
                .await;
            if result.tool_call_id.trim().is_empty() || result.tool_call_id.trim() == "pending" {
                result.tool_call_id = patched_call.id.clone();
            }

            messages.push(result.to_tool_message());
            self.append_image_notification(task, &result, messages);
            cycle_record.tool_results.push(result.clone());
            on_tool_result(call, &result);

            if result.directive.is_terminal() {
                let (error_code, skip_message) = match result.directive {
                    ToolDirective::WaitUser => (
                        "skipped_due_to_wait_user",
                        "Tool skipped because a previous tool requested user input.",
                    ),
                    _ => (
                        "skipped_due_to_finish",
                        "Tool skipped because a previous tool finished the task.",
                    ),
                };
                self.skip_remaining(
                    &tool_calls[index + 1..],
                    error_code,
                    skip_message,
                    messages,
                    cycle_record,
                    on_tool_result,
                );
                outcome.directive_result = Some(result);
                break;
            }

            if let Some(provider) = interruption_provider {
                let pending = provider();
                if !pending.is_empty() {
                    outcome.interruption_messages.extend(pending);
                    self.skip_remaining(
                        &tool_calls[index + 1..],
                        "skipped_due_to_steering",
                        "Tool skipped due to queued steering message.",
                        messages,
                        cycle_record,
                        on_tool_result,
                    );
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Image-bearing results get a follow-up user message so the model can
    /// actually see the payload; non-multimodal tasks only get the textual
    /// reference.
    fn append_image_notification(&self, task: &AgentTask, result: &ToolExecutionResult, messages: &mut Vec<Message>) {
        if let Some(image_url) = &result.image_url {
            let reference = result.image_path.as_deref().unwrap_or(image_url);
            if task.native_multimodal {
                messages.push(Message::user_with_image(format!("[Image loaded] {reference}"), image_url.clone()));
            } else {
                messages.push(Message::user(format!("[Image loaded] {reference}")));
            }
        } else if let Some(image_path) = &result.image_path {
            messages.push(Message::user(format!("[Image loaded] {image_path}")));
        }
    }

    fn skip_remaining(
        &self,
        skipped_calls: &[ToolCall],
        error_code: &str,
        message: &str,
        messages: &mut Vec<Message>,
        cycle_record: &mut CycleRecord,
        on_tool_result: &(dyn Fn(&ToolCall, &ToolExecutionResult) + Sync),
    ) {
        for call in skipped_calls {
            let mut skipped = ToolExecutionResult::error(
                json!({"ok": false, "error": message, "error_code": error_code}).to_string(),
                error_code,
            );
            skipped.tool_call_id = call.id.clone();
            skipped.status = ToolResultStatus::Error;
            messages.push(skipped.to_tool_message());
            cycle_record.tool_results.push(skipped.clone());
            on_tool_result(call, &skipped);
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
