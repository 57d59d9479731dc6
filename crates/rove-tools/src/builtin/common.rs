// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use crate::context::ToolContext;

/// Current `todo_list` entries, empty when absent or not an array.
pub(crate) fn get_todo_list(ctx: &ToolContext) -> Vec<Value> {
    ctx.update_shared(|shared| match shared.get("todo_list") {
        Some(Value::Array(items)) => items.clone(),
        _ => {
            shared.insert("todo_list".into(), Value::Array(Vec::new()));
            Vec::new()
        }
    })
}

pub(crate) fn arg_str<'a>(args: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn arg_bool(args: &serde_json::Map<String, Value>, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn arg_u64(args: &serde_json::Map<String, Value>, key: &str, default: u64) -> u64 {
    args.get(key).and_then(Value::as_u64).unwrap_or(default)
}
