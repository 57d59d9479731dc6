// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::json;
use tracing::{debug, warn};

use rove_types::{ToolCall, ToolDirective, ToolExecutionResult, ToolResultStatus};

use crate::context::ToolContext;
use crate::registry::ToolRegistry;

/// Execute one parsed tool call and normalize its result.
///
/// Every failure mode becomes an error *result* the model can observe and
/// recover from: unknown tool → `tool_not_found`, non-object arguments →
/// `invalid_arguments_json`, a handler `Err` → `handler_exception`.  The
/// returned result always carries the call's id, and `wait_user` results
/// always report status `WAIT_RESPONSE`.
pub async fn dispatch_tool_call(registry: &ToolRegistry, ctx: &ToolContext, call: &ToolCall) -> ToolExecutionResult {
    let mut result = run_handler(registry, ctx, call).await;

    if needs_tool_call_id(&result.tool_call_id) {
        result.tool_call_id = call.id.clone();
    }
    if result.directive == ToolDirective::WaitUser {
        result.status = ToolResultStatus::WaitResponse;
    }
    result
}

async fn run_handler(registry: &ToolRegistry, ctx: &ToolContext, call: &ToolCall) -> ToolExecutionResult {
    let Some(tool) = registry.get(&call.name) else {
        warn!(tool = %call.name, "model requested unknown tool");
        return ToolExecutionResult::error(
            json!({
                "ok": false,
                "error": format!("Unknown tool: {}", call.name),
                "error_code": "tool_not_found",
            })
            .to_string(),
            "tool_not_found",
        );
    };

    let Some(args) = call.arguments.as_object() else {
        return ToolExecutionResult::error(
            json!({
                "ok": false,
                "error": "Tool arguments must be a JSON object",
                "error_code": "invalid_arguments_json",
            })
            .to_string(),
            "invalid_arguments_json",
        );
    };

    debug!(tool = %call.name, tool_call_id = %call.id, "dispatching tool call");
    match tool.execute(ctx, args).await {
        Ok(result) => result,
        Err(err) => ToolExecutionResult::error(
            json!({
                "ok": false,
                "error": format!("Tool handler failed: {err}"),
                "error_code": "handler_exception",
            })
            .to_string(),
            "handler_exception",
        ),
    }
}

fn needs_tool_call_id(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "pending"
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use rove_types::{shared_state, StateMap};
    use rove_workspace::MemoryWorkspaceBackend;

    use super::*;
    use crate::registry::Tool;

    struct OkTool;

    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "ok_tool"
        }
        fn description(&self) -> &str {
            "succeeds"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
            Ok(ToolExecutionResult::success(r#"{"ok":true}"#))
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
            anyhow::bail!("disk exploded")
        }
    }

    struct WaitTool;

    #[async_trait]
    impl Tool for WaitTool {
        fn name(&self) -> &str {
            "waits"
        }
        fn description(&self) -> &str {
            "pauses the run"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
            // Directive set without the constructor so the dispatcher has to
            // normalize the status itself.
            let mut result = ToolExecutionResult::success("{}");
            result.directive = ToolDirective::WaitUser;
            Ok(result)
        }
    }

    fn setup() -> (ToolRegistry, ToolContext) {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool);
        registry.register(PanickyTool);
        registry.register(WaitTool);
        let ctx = ToolContext::new(
            std::path::PathBuf::from("/ws"),
            Arc::new(MemoryWorkspaceBackend::new()),
            shared_state(None),
        );
        (registry, ctx)
    }

    #[tokio::test]
    async fn unknown_tool_yields_tool_not_found() {
        let (registry, ctx) = setup();
        let call = ToolCall::new("c1", "missing", json!({}));
        let result = dispatch_tool_call(&registry, &ctx, &call).await;
        assert!(result.is_error());
        assert_eq!(result.error_code.as_deref(), Some("tool_not_found"));
        assert_eq!(result.tool_call_id, "c1");
    }

    #[tokio::test]
    async fn non_object_arguments_rejected() {
        let (registry, ctx) = setup();
        let call = ToolCall::new("c2", "ok_tool", json!([1, 2, 3]));
        let result = dispatch_tool_call(&registry, &ctx, &call).await;
        assert_eq!(result.error_code.as_deref(), Some("invalid_arguments_json"));
    }

    #[tokio::test]
    async fn handler_error_becomes_handler_exception() {
        let (registry, ctx) = setup();
        let call = ToolCall::new("c3", "panicky", json!({}));
        let result = dispatch_tool_call(&registry, &ctx, &call).await;
        assert_eq!(result.error_code.as_deref(), Some("handler_exception"));
        assert!(result.content.contains("disk exploded"));
    }

    #[tokio::test]
    async fn backfills_blank_tool_call_id() {
        let (registry, ctx) = setup();
        let call = ToolCall::new("c4", "ok_tool", json!({}));
        let result = dispatch_tool_call(&registry, &ctx, &call).await;
        assert_eq!(result.tool_call_id, "c4");
    }

    #[tokio::test]
    async fn wait_user_maps_to_wait_response_status() {
        let (registry, ctx) = setup();
        let call = ToolCall::new("c5", "waits", json!({}));
        let result = dispatch_tool_call(&registry, &ctx, &call).await;
        assert_eq!(result.status, ToolResultStatus::WaitResponse);
        assert_eq!(result.directive, ToolDirective::WaitUser);
    }
}
