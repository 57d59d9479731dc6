// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

use rove_types::{Message, StreamCallback, ToolCall};

use crate::error::LlmError;

/// One completed model turn.
///
/// `raw` carries whatever the provider returned beyond the normalized
/// fields; the runtime reads token usage from `raw["usage"]` in either the
/// prompt/completion or input/output naming family.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_content: Option<String>,
    pub raw: Value,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Value) -> Self {
        if !self.raw.is_object() {
            self.raw = Value::Object(Default::default());
        }
        if let Some(map) = self.raw.as_object_mut() {
            map.insert("usage".into(), usage);
        }
        self
    }

    /// The `usage` payload of the raw response, `null` when absent.
    pub fn usage(&self) -> &Value {
        self.raw.get("usage").unwrap_or(&Value::Null)
    }
}

/// Parameters of one completion request.
pub struct CompletionParams<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    /// Tool schemas as provider-neutral JSON objects
    /// (`{name, description, parameters}`).
    pub tools: &'a [Value],
    /// Invoked with each text chunk as it arrives.  Streaming clients must
    /// still return the final aggregated response.
    pub stream_callback: Option<StreamCallback>,
}

/// A language-model oracle.  Implementations own provider quirks, transport
/// retries and request timeouts; the runtime does not retry failed calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, params: CompletionParams<'_>) -> Result<LlmResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn with_usage_installs_payload_under_raw() {
        let response = LlmResponse::text("hi").with_usage(json!({"prompt_tokens": 3}));
        assert_eq!(response.usage()["prompt_tokens"], 3);
    }

    #[test]
    fn usage_is_null_when_absent() {
        assert!(LlmResponse::text("hi").usage().is_null());
    }
}
