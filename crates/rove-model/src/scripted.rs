// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use rove_types::{Message, Role};

use crate::client::{CompletionParams, LlmClient, LlmResponse};
use crate::error::LlmError;

/// Record of one request seen by a scripted client, kept for inspection.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
}

/// A pre-scripted client.  Each call to `complete` pops the next response
/// from the front of the queue, so tests can specify exact turn sequences
/// — including tool calls — without network access.
pub struct ScriptedClient {
    steps: Mutex<Vec<LlmResponse>>,
    /// Every request seen so far, in call order.
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// When the script runs dry: return this error, or fall back to an
    /// empty text response when `None`.
    exhausted_error: Option<String>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<LlmResponse>) -> Self {
        Self {
            steps: Mutex::new(steps),
            requests: Arc::new(Mutex::new(Vec::new())),
            exhausted_error: None,
        }
    }

    /// Fail with `message` instead of returning empty text once all scripted
    /// steps are consumed.  Used to assert a run makes exactly N model calls.
    pub fn strict(mut self, message: impl Into<String>) -> Self {
        self.exhausted_error = Some(message.into());
        self
    }

    /// Shared handle to the recorded requests.
    pub fn requests(&self) -> Arc<Mutex<Vec<RecordedRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Number of scripted steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.steps.lock().expect("scripted steps lock").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, params: CompletionParams<'_>) -> Result<LlmResponse, LlmError> {
        self.requests.lock().expect("request log lock").push(RecordedRequest {
            model: params.model.to_string(),
            messages: params.messages.to_vec(),
            tools: params.tools.to_vec(),
        });

        let next = {
            let mut steps = self.steps.lock().expect("scripted steps lock");
            if steps.is_empty() {
                None
            } else {
                Some(steps.remove(0))
            }
        };

        let response = match next {
            Some(response) => response,
            None => match &self.exhausted_error {
                Some(message) => return Err(LlmError::Request(message.clone())),
                None => LlmResponse::text(""),
            },
        };

        if let Some(callback) = &params.stream_callback {
            if !response.content.is_empty() {
                callback(&response.content);
            }
        }
        Ok(response)
    }
}

/// Echoes the last user message back as the assistant response.  Handy for
/// wiring checks where the content does not matter.
#[derive(Default)]
pub struct EchoClient;

#[async_trait]
impl LlmClient for EchoClient {
    async fn complete(&self, params: CompletionParams<'_>) -> Result<LlmResponse, LlmError> {
        let reply = params
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".to_string());
        Ok(LlmResponse::text(format!("ECHO: {reply}")))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
