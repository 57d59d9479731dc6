// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Clamped readers for `AgentTask::metadata`.
//!
//! Runtime knobs travel as free-form JSON; these helpers apply the
//! documented fallback rule: any missing, mistyped, or out-of-range value
//! falls back to the default.

use serde_json::Value;

use crate::StateMap;

/// Read an unsigned integer knob, clamped to `minimum`.
///
/// Accepts JSON numbers and numeric strings.  Negative and non-numeric
/// values fall back to `default`.
pub fn read_u64(metadata: &StateMap, key: &str, default: u64, minimum: u64) -> u64 {
    let value = match metadata.get(key) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_i64().and_then(|i| u64::try_from(i).ok())),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    value.unwrap_or(default).max(minimum)
}

/// Read a non-empty string knob.
pub fn read_str(metadata: &StateMap, key: &str) -> Option<String> {
    match metadata.get(key) {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// Read a boolean knob, defaulting when absent or mistyped.
pub fn read_bool(metadata: &StateMap, key: &str, default: bool) -> bool {
    match metadata.get(key) {
        Some(Value::Bool(b)) => *b,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(entries: &[(&str, Value)]) -> StateMap {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn read_u64_accepts_numbers_and_strings() {
        let m = map(&[("a", json!(5)), ("b", json!("7"))]);
        assert_eq!(read_u64(&m, "a", 0, 0), 5);
        assert_eq!(read_u64(&m, "b", 0, 0), 7);
    }

    #[test]
    fn read_u64_falls_back_on_garbage() {
        let m = map(&[("neg", json!(-3)), ("text", json!("lots")), ("list", json!([1]))]);
        assert_eq!(read_u64(&m, "neg", 9, 0), 9);
        assert_eq!(read_u64(&m, "text", 9, 0), 9);
        assert_eq!(read_u64(&m, "list", 9, 0), 9);
        assert_eq!(read_u64(&m, "missing", 9, 0), 9);
    }

    #[test]
    fn read_u64_clamps_to_minimum() {
        let m = map(&[("small", json!(0))]);
        assert_eq!(read_u64(&m, "small", 5, 1), 1);
    }

    #[test]
    fn read_str_trims_and_rejects_empty() {
        let m = map(&[("a", json!("  hello ")), ("b", json!("   ")), ("c", json!(4))]);
        assert_eq!(read_str(&m, "a").as_deref(), Some("hello"));
        assert_eq!(read_str(&m, "b"), None);
        assert_eq!(read_str(&m, "c"), None);
    }

    #[test]
    fn read_bool_defaults_on_mistype() {
        let m = map(&[("yes", json!(true)), ("text", json!("true"))]);
        assert!(read_bool(&m, "yes", false));
        assert!(read_bool(&m, "text", false) == false);
        assert!(read_bool(&m, "missing", true));
    }
}
