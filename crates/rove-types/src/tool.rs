// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{AssistantToolCall, Message};
use crate::StateMap;

// ─── Directives and statuses ──────────────────────────────────────────────────

/// Control-flow signal a tool hands back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDirective {
    #[default]
    Continue,
    WaitUser,
    Finish,
}

impl ToolDirective {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::WaitUser | Self::Finish)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolResultStatus {
    #[default]
    Success,
    Error,
    WaitResponse,
}

// ─── Tool calls ───────────────────────────────────────────────────────────────

/// A parsed tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Decoded JSON arguments.  The dispatcher rejects non-object values.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Wire-form entry for an assistant message's `tool_calls` list.
    pub fn to_assistant_entry(&self) -> AssistantToolCall {
        AssistantToolCall::new(
            self.id.clone(),
            self.name.clone(),
            serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string()),
        )
    }
}

// ─── Tool results ─────────────────────────────────────────────────────────────

/// The outcome of executing one tool call.
///
/// Handlers may leave `tool_call_id` empty; the dispatcher backfills it with
/// the id of the call that produced the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    #[serde(default)]
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub status: ToolResultStatus,
    #[serde(default)]
    pub directive: ToolDirective,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub metadata: StateMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl ToolExecutionResult {
    /// Successful result with JSON content.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            tool_call_id: String::new(),
            content: content.into(),
            status: ToolResultStatus::Success,
            directive: ToolDirective::Continue,
            error_code: None,
            metadata: StateMap::new(),
            image_url: None,
            image_path: None,
        }
    }

    /// Error result carrying a stable machine-readable code.
    pub fn error(content: impl Into<String>, error_code: impl Into<String>) -> Self {
        let mut result = Self::success(content);
        result.status = ToolResultStatus::Error;
        result.error_code = Some(error_code.into());
        result
    }

    /// Attach a terminal or continue directive.  `wait_user` results report
    /// status `WAIT_RESPONSE` so callers can distinguish a pause from an
    /// ordinary success.
    pub fn with_directive(mut self, directive: ToolDirective) -> Self {
        self.directive = directive;
        if directive == ToolDirective::WaitUser {
            self.status = ToolResultStatus::WaitResponse;
        }
        self
    }

    pub fn with_metadata(mut self, metadata: StateMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_image(mut self, image_url: Option<String>, image_path: Option<String>) -> Self {
        self.image_url = image_url;
        self.image_path = image_path;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolResultStatus::Error
    }

    /// Tool-role message representation of this result.
    pub fn to_tool_message(&self) -> Message {
        Message::tool_result(self.tool_call_id.clone(), self.content.clone())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
