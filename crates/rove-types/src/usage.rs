// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Per-cycle usage ──────────────────────────────────────────────────────────

/// Token usage reported by one model call, normalized across providers.
///
/// Providers disagree on field names (`prompt_tokens` vs `input_tokens`,
/// nested `*_details` objects, cache counters); [`normalize_token_usage`]
/// folds the common shapes into this one struct and keeps the raw payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl TokenUsage {
    pub fn has_usage(&self) -> bool {
        self.prompt_tokens != 0
            || self.completion_tokens != 0
            || self.total_tokens != 0
            || self.cached_tokens != 0
            || self.reasoning_tokens != 0
            || self.input_tokens != 0
            || self.output_tokens != 0
            || self.cache_creation_tokens != 0
    }
}

/// Normalize a provider `usage` payload into [`TokenUsage`].
///
/// Accepts both the prompt/completion and input/output naming families.
/// Missing totals are derived; missing counters default to zero.  A
/// non-object payload yields an empty usage.
pub fn normalize_token_usage(raw: &Value) -> TokenUsage {
    if !raw.is_object() {
        return TokenUsage::default();
    }

    let prompt = read_u64_field(raw, &["prompt_tokens"]);
    let completion = read_u64_field(raw, &["completion_tokens"]);
    let input = read_u64_field(raw, &["input_tokens"]).or(prompt);
    let output = read_u64_field(raw, &["output_tokens"]).or(completion);

    let total = read_u64_field(raw, &["total_tokens"])
        .unwrap_or_else(|| prompt.or(input).unwrap_or(0) + completion.or(output).unwrap_or(0));

    let cached = read_nested(
        raw,
        &[
            &["prompt_tokens_details", "cached_tokens"],
            &["input_tokens_details", "cached_tokens"],
            &["cache_read_input_tokens"],
            &["cache_read_tokens"],
        ],
    );
    let reasoning = read_nested(
        raw,
        &[
            &["completion_tokens_details", "reasoning_tokens"],
            &["output_tokens_details", "reasoning_tokens"],
            &["reasoning_tokens"],
        ],
    );
    let cache_creation = read_nested(
        raw,
        &[
            &["input_tokens_details", "cache_creation_tokens"],
            &["prompt_tokens_details", "cache_creation_tokens"],
            &["cache_creation_input_tokens"],
            &["cache_creation_tokens"],
        ],
    );

    TokenUsage {
        prompt_tokens: prompt.or(input).unwrap_or(0),
        completion_tokens: completion.or(output).unwrap_or(0),
        total_tokens: total,
        cached_tokens: cached.unwrap_or(0),
        reasoning_tokens: reasoning.unwrap_or(0),
        input_tokens: input.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
        cache_creation_tokens: cache_creation.unwrap_or(0),
        raw: raw.clone(),
    }
}

fn read_u64_field(source: &Value, path: &[&str]) -> Option<u64> {
    let mut current = source;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_nested(source: &Value, paths: &[&[&str]]) -> Option<u64> {
    paths.iter().find_map(|path| read_u64_field(source, path))
}

// ─── Per-task usage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleTokenUsage {
    pub cycle_index: u32,
    pub usage: TokenUsage,
}

/// Monotonic accumulation of per-cycle usage across a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cycles: Vec<CycleTokenUsage>,
}

impl TaskTokenUsage {
    /// Fold one cycle's usage into the task totals.  Cycles without any
    /// reported usage are skipped entirely.
    pub fn add_cycle(&mut self, cycle_index: u32, usage: TokenUsage) {
        if !usage.has_usage() {
            return;
        }
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.cached_tokens += usage.cached_tokens;
        self.reasoning_tokens += usage.reasoning_tokens;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cycles.push(CycleTokenUsage { cycle_index, usage });
    }
}

/// Sum the token usage of every recorded cycle.
pub fn summarize_task_token_usage(cycles: &[crate::CycleRecord]) -> TaskTokenUsage {
    let mut summary = TaskTokenUsage::default();
    for cycle in cycles {
        summary.add_cycle(cycle.index, cycle.token_usage.clone());
    }
    summary
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
