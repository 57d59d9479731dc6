// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failures surfaced by an LLM client.
///
/// The runtime converts any of these into a failed cycle; retry policy lives
/// inside client implementations, never in the engine.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("model returned an unparseable response: {0}")]
    InvalidResponse(String),
}
