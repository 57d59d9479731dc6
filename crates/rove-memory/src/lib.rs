// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded-context maintenance for agent runs.
//!
//! [`MemoryManager::compact`] applies a fixed sequence of deterministic,
//! idempotent rewrites to the message history and, when the token budget is
//! still exceeded, replaces the middle of the conversation with a single
//! generated summary message.  Pairing legality (tool message ↔ assistant
//! tool_calls entry) always holds on exit.

mod manager;

pub use manager::{MemoryManager, SummaryBackend, MEMORY_SUMMARY_NAME, TOOL_RESULT_COMPACT_MARKER};
