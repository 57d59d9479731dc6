// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Roles ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// A single message in the conversation history.
///
/// Tool-role messages must reference an earlier assistant message's
/// `tool_calls` entry through `tool_call_id`; the memory manager is the only
/// component allowed to transiently break that pairing, and it re-establishes
/// it before returning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Sender label.  The memory manager names its summary message
    /// `memory_summary` so it can be located on later passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Data URL or HTTPS URL attached to a user message (multimodal input).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// System message with an explicit sender name.
    pub fn named_system(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::plain(Role::System, text);
        msg.name = Some(name.into());
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::plain(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// User message carrying an inline image payload.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        let mut msg = Self::plain(Role::User, text);
        msg.image_url = Some(image_url.into());
        msg
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            reasoning_content: None,
            image_url: None,
        }
    }

    /// True when this assistant message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    /// Approximate token count used for context management.
    ///
    /// 4-chars-per-token heuristic for text; an attached image payload counts
    /// as ~765 tokens (the typical high-detail estimate for a 512×512 tile).
    pub fn approx_tokens(&self) -> u64 {
        let mut chars = self.content.len();
        if let Some(calls) = &self.tool_calls {
            for call in calls {
                chars += call.function.name.len() + call.function.arguments.len();
            }
        }
        if self.image_url.is_some() {
            chars += 765 * 4;
        }
        ((chars / 4).max(1)) as u64
    }
}

// ─── Assistant tool-call entries ──────────────────────────────────────────────

/// One `tool_calls` entry on an assistant message, in wire form: the
/// arguments are a JSON-encoded string, not a decoded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl AssistantToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments_json: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments_json.into(),
            },
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
