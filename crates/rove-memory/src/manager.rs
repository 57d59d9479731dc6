// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use rove_types::{Message, Role};
use rove_workspace::WorkspaceBackend;

/// Sender name of the generated summary message.
pub const MEMORY_SUMMARY_NAME: &str = "memory_summary";

/// First line of a tool result that has been persisted to an artifact.
pub const TOOL_RESULT_COMPACT_MARKER: &str = "<Tool Result Compact>";

const MEMORY_WARNING_TEXT: &str = "Memory usage has exceeded {threshold}% of the context budget. \
     Persist key information into workspace files now so nothing is lost when older history is compressed.";

const SUMMARY_PROMPT: &str = "You are a context compaction assistant for an autonomous agent. \
     Summarise the following event log in a concise, information-dense way. \
     Preserve decisions, file paths, tool outcomes, and open questions the agent \
     will need to continue correctly. The summary replaces the original history.";

/// Produces the summary body when the rewrites alone cannot fit the budget.
/// Typically another LLM call; returning `None` falls back to the
/// deterministic event list.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    async fn summarize(&self, prompt: &str, backend: Option<&str>, model: Option<&str>) -> Option<String>;
}

/// Deterministic context maintenance over a message list.
///
/// All thresholds are token-denominated; the caller passes the previous
/// cycle's reported `total_tokens` and the manager falls back to a
/// 4-chars-per-token estimate when none is known yet.
pub struct MemoryManager {
    compact_threshold: u64,
    keep_recent_messages: usize,
    warning_threshold_percentage: u8,
    include_memory_warning: bool,
    tool_result_compact_threshold: usize,
    tool_result_keep_last: usize,
    tool_result_excerpt_head: usize,
    tool_result_excerpt_tail: usize,
    tool_calls_keep_last: usize,
    assistant_no_tool_keep_last: usize,
    tool_result_artifact_dir: String,
    workspace_backend: Option<Arc<dyn WorkspaceBackend>>,
    summary_event_limit: usize,
    summary_backend_name: Option<String>,
    summary_model: Option<String>,
    summary: Option<Arc<dyn SummaryBackend>>,
}

impl MemoryManager {
    pub fn new(compact_threshold: u64) -> Self {
        Self {
            compact_threshold,
            keep_recent_messages: 10,
            warning_threshold_percentage: 90,
            include_memory_warning: false,
            tool_result_compact_threshold: 2_000,
            tool_result_keep_last: 3,
            tool_result_excerpt_head: 200,
            tool_result_excerpt_tail: 200,
            tool_calls_keep_last: 3,
            assistant_no_tool_keep_last: 1,
            tool_result_artifact_dir: ".memory/tool_results".to_string(),
            workspace_backend: None,
            summary_event_limit: 40,
            summary_backend_name: None,
            summary_model: None,
            summary: None,
        }
    }

    pub fn with_keep_recent_messages(mut self, keep: usize) -> Self {
        self.keep_recent_messages = keep.max(1);
        self
    }

    pub fn with_memory_warning(mut self, enabled: bool, threshold_percentage: u8) -> Self {
        self.include_memory_warning = enabled;
        self.warning_threshold_percentage = threshold_percentage.clamp(1, 100);
        self
    }

    pub fn with_tool_result_limits(mut self, compact_threshold: usize, keep_last: usize, head: usize, tail: usize) -> Self {
        self.tool_result_compact_threshold = compact_threshold;
        self.tool_result_keep_last = keep_last;
        self.tool_result_excerpt_head = head;
        self.tool_result_excerpt_tail = tail;
        self
    }

    pub fn with_tool_calls_keep_last(mut self, keep: usize) -> Self {
        self.tool_calls_keep_last = keep;
        self
    }

    pub fn with_assistant_no_tool_keep_last(mut self, keep: usize) -> Self {
        self.assistant_no_tool_keep_last = keep;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<String>) -> Self {
        self.tool_result_artifact_dir = dir.into();
        self
    }

    pub fn with_workspace_backend(mut self, backend: Arc<dyn WorkspaceBackend>) -> Self {
        self.workspace_backend = Some(backend);
        self
    }

    pub fn with_summary_event_limit(mut self, limit: usize) -> Self {
        self.summary_event_limit = limit.max(1);
        self
    }

    pub fn with_summary_backend(
        mut self,
        summary: Arc<dyn SummaryBackend>,
        backend_name: Option<String>,
        model: Option<String>,
    ) -> Self {
        self.summary = Some(summary);
        self.summary_backend_name = backend_name;
        self.summary_model = model;
        self
    }

    /// Rewrite `messages` to fit the token budget.
    ///
    /// `total_tokens` is the previous cycle's reported usage;
    /// `recent_tool_call_ids` protects the immediately preceding cycle's
    /// tool pairings from being stripped or persisted; `cycle_index` names
    /// the artifact subdirectory.  Returns the (possibly identical) list and
    /// whether anything changed.
    pub async fn compact(
        &self,
        messages: &[Message],
        total_tokens: Option<u64>,
        recent_tool_call_ids: Option<&HashSet<String>>,
        cycle_index: Option<u32>,
    ) -> (Vec<Message>, bool) {
        if messages.is_empty() {
            return (messages.to_vec(), false);
        }

        let tokens = total_tokens.unwrap_or_else(|| estimate_tokens(messages));
        if tokens <= self.compact_threshold {
            if pairing_is_legal(messages) {
                let (warned, _) = self.maybe_append_memory_warning(messages.to_vec(), tokens);
                let changed = warned != messages;
                return (warned, changed);
            }
            // Under budget but illegal: repair pairing only, no artifact churn.
            let repaired = normalize_orphan_tool_messages(sanitize_empty_assistant(messages.to_vec()));
            let changed = repaired != messages;
            return (repaired, changed);
        }

        // Ordered rewrites.  The prior summary is extracted up front and
        // either folded into a new summary or reinstated untouched, which is
        // what makes compact(compact(x)) == compact(x) hold.
        let (mut current, prior_summary) = extract_prior_summary(messages.to_vec());
        current = sanitize_empty_assistant(current);
        current = self.strip_stale_tool_calls(current, recent_tool_call_ids);
        current = normalize_orphan_tool_messages(current);
        current = self.collapse_assistant_runs(current);
        current = compact_processed_images(current);
        current = self.persist_oversized_tool_results(current, recent_tool_call_ids, cycle_index);
        current = sanitize_empty_assistant(current);

        if estimate_tokens(&current) > self.compact_threshold {
            current = self.summarize(current, prior_summary.as_ref()).await;
        } else if let Some(summary) = prior_summary {
            current = reinstate_summary(current, summary);
        }

        let changed = current != messages;
        (current, changed)
    }

    // ─── Memory warning ───────────────────────────────────────────────────────

    fn maybe_append_memory_warning(&self, messages: Vec<Message>, tokens: u64) -> (Vec<Message>, bool) {
        if !self.include_memory_warning || self.compact_threshold == 0 {
            return (messages, false);
        }
        let usage_percentage = tokens.saturating_mul(100) / self.compact_threshold;
        if usage_percentage < self.warning_threshold_percentage as u64 {
            return (messages, false);
        }
        let warning = MEMORY_WARNING_TEXT.replace("{threshold}", &self.warning_threshold_percentage.to_string());
        let already_warned = messages
            .iter()
            .rev()
            .take(10)
            .any(|m| m.role == Role::User && m.content == warning);
        if already_warned {
            return (messages, false);
        }
        let mut warned = messages;
        warned.push(Message::user(warning));
        (warned, true)
    }

    // ─── Rewrites ─────────────────────────────────────────────────────────────

    /// Keep `tool_calls` only on the last K assistant messages that carry
    /// them (plus any protected by `recent_tool_call_ids`); older ones are
    /// cleared and dropped when left content-empty.
    fn strip_stale_tool_calls(&self, messages: Vec<Message>, recent: Option<&HashSet<String>>) -> Vec<Message> {
        let carrier_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::Assistant && m.has_tool_calls())
            .map(|(idx, _)| idx)
            .collect();
        let keep_from = carrier_indices.len().saturating_sub(self.tool_calls_keep_last);
        let mut keep: HashSet<usize> = carrier_indices[keep_from..].iter().copied().collect();
        if let Some(recent) = recent {
            for &idx in &carrier_indices {
                let protected = messages[idx]
                    .tool_calls
                    .as_ref()
                    .is_some_and(|calls| calls.iter().any(|c| recent.contains(&c.id)));
                if protected {
                    keep.insert(idx);
                }
            }
        }

        let mut stripped = Vec::with_capacity(messages.len());
        for (idx, mut message) in messages.into_iter().enumerate() {
            if message.role == Role::Assistant && message.has_tool_calls() && !keep.contains(&idx) {
                message.tool_calls = None;
                if message.content.trim().is_empty() {
                    continue;
                }
            }
            stripped.push(message);
        }
        stripped
    }

    /// Truncate runs of consecutive assistant-without-tool-calls messages to
    /// the last N.
    fn collapse_assistant_runs(&self, messages: Vec<Message>) -> Vec<Message> {
        let keep_last = self.assistant_no_tool_keep_last;
        if keep_last == 0 {
            return messages;
        }
        let mut collapsed: Vec<Message> = Vec::with_capacity(messages.len());
        let mut run: Vec<Message> = Vec::new();
        let flush = |run: &mut Vec<Message>, out: &mut Vec<Message>| {
            if run.len() > keep_last {
                out.extend(run.drain(run.len() - keep_last..));
                run.clear();
            } else {
                out.append(run);
            }
        };
        for message in messages {
            if message.role == Role::Assistant && !message.has_tool_calls() {
                run.push(message);
                continue;
            }
            flush(&mut run, &mut collapsed);
            collapsed.push(message);
        }
        flush(&mut run, &mut collapsed);
        collapsed
    }

    /// Persist oversized tool results to workspace artifacts and replace the
    /// message content with a compact excerpt block.
    fn persist_oversized_tool_results(
        &self,
        messages: Vec<Message>,
        recent: Option<&HashSet<String>>,
        cycle_index: Option<u32>,
    ) -> Vec<Message> {
        if self.tool_result_compact_threshold == 0 {
            return messages;
        }
        let tool_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::Tool)
            .map(|(idx, _)| idx)
            .collect();
        let keep_from = tool_indices.len().saturating_sub(self.tool_result_keep_last);
        let keep: HashSet<usize> = tool_indices[keep_from..].iter().copied().collect();

        let mut compacted = Vec::with_capacity(messages.len());
        for (idx, mut message) in messages.into_iter().enumerate() {
            let skip = message.role != Role::Tool
                || keep.contains(&idx)
                || message.content.len() <= self.tool_result_compact_threshold
                || message.content.starts_with(TOOL_RESULT_COMPACT_MARKER)
                || recent.zip(message.tool_call_id.as_ref()).is_some_and(|(r, id)| r.contains(id));
            if skip {
                compacted.push(message);
                continue;
            }
            let artifact_path = self.persist_artifact(&message, cycle_index);
            message.content = self.build_compact_block(&message.content, artifact_path.as_deref());
            compacted.push(message);
        }
        compacted
    }

    fn persist_artifact(&self, message: &Message, cycle_index: Option<u32>) -> Option<String> {
        let backend = self.workspace_backend.as_ref()?;
        let raw_id = message
            .tool_call_id
            .clone()
            .unwrap_or_else(|| format!("tool_result_{}", Uuid::new_v4().simple()));
        let safe_id = Regex::new(r"[^a-zA-Z0-9._-]")
            .expect("static pattern")
            .replace_all(raw_id.trim(), "_")
            .into_owned();
        let relative = match cycle_index {
            Some(cycle) => format!("{}/cycle_{cycle}/{safe_id}.txt", self.tool_result_artifact_dir),
            None => format!("{}/{safe_id}.txt", self.tool_result_artifact_dir),
        };
        match backend.write_text(&relative, &message.content, false) {
            Ok(_) => Some(relative),
            Err(err) => {
                warn!(path = %relative, error = %err, "failed to persist tool result artifact");
                None
            }
        }
    }

    fn build_compact_block(&self, content: &str, artifact_path: Option<&str>) -> String {
        let head_len = floor_char_boundary(content, self.tool_result_excerpt_head);
        let head = &content[..head_len];
        let tail = if self.tool_result_excerpt_tail > 0 && content.len() > head_len {
            let start = ceil_char_boundary(content, content.len().saturating_sub(self.tool_result_excerpt_tail));
            &content[start..]
        } else {
            ""
        };

        let mut excerpt = String::new();
        if !head.is_empty() {
            excerpt.push_str(head);
        }
        if !tail.is_empty() {
            if !head.is_empty() {
                excerpt.push_str("\n...<snip>...\n");
            }
            excerpt.push_str(tail);
        }
        let truncated = content.len().saturating_sub(head.len() + tail.len());

        format!(
            "{TOOL_RESULT_COMPACT_MARKER}\n\
             artifact_path: {}\n\
             total_chars: {}\n\
             truncated_chars: {truncated}\n\
             retrieval_hint: use read_file on artifact_path if needed\n\
             excerpt:\n{}\n\
             </Tool Result Compact>",
            artifact_path.unwrap_or("N/A"),
            content.len(),
            excerpt.trim(),
        )
    }

    // ─── Summarization ────────────────────────────────────────────────────────

    async fn summarize(&self, messages: Vec<Message>, prior_summary: Option<&Message>) -> Vec<Message> {
        let head_size = messages.len().min(2);
        if messages.len() <= head_size {
            return match prior_summary {
                Some(summary) => reinstate_summary(messages, summary.clone()),
                None => messages,
            };
        }

        let mut recent_start = head_size.max(messages.len().saturating_sub(self.keep_recent_messages));
        // Never let the window begin inside a tool-result group.
        while recent_start > head_size && messages[recent_start].role == Role::Tool {
            recent_start -= 1;
        }

        if recent_start <= head_size {
            // Nothing in the middle to fold away.
            return match prior_summary {
                Some(summary) => reinstate_summary(messages, summary.clone()),
                None => messages,
            };
        }

        let head = &messages[..head_size];
        let middle = &messages[head_size..recent_start];
        let recent = &messages[recent_start..];

        let events = self.build_summary_events(middle);
        let mut artifacts = prior_summary.map(collect_summary_artifacts).unwrap_or_default();
        for path in collect_compacted_artifacts(&messages) {
            if !artifacts.contains(&path) {
                artifacts.push(path);
            }
        }

        let body = self.summary_body(&events).await;
        let artifact_block = if artifacts.is_empty() {
            "(none)".to_string()
        } else {
            artifacts.join("\n")
        };
        let content = format!(
            "<Compressed Agent Memory>\n{body}\n</Compressed Agent Memory>\n\
             <Persisted Artifacts>\n{artifact_block}\n</Persisted Artifacts>\n\
             retrieval_hint: use read_file with an artifact path when details are needed",
        );
        debug!(folded = middle.len(), artifacts = artifacts.len(), "memory summarized");

        let mut result = Vec::with_capacity(head_size + 1 + recent.len());
        result.extend_from_slice(head);
        result.push(Message::named_system(MEMORY_SUMMARY_NAME, content));
        result.extend_from_slice(recent);
        result
    }

    async fn summary_body(&self, events: &str) -> String {
        if let Some(summary) = &self.summary {
            let prompt = format!("{SUMMARY_PROMPT}\n\n---\n\n{events}");
            if let Some(body) = summary
                .summarize(&prompt, self.summary_backend_name.as_deref(), self.summary_model.as_deref())
                .await
            {
                let trimmed = body.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
            warn!("summary backend returned nothing; falling back to event digest");
        }
        events.to_string()
    }

    fn build_summary_events(&self, middle: &[Message]) -> String {
        let mut events: Vec<String> = Vec::new();
        for (idx, message) in middle.iter().take(self.summary_event_limit).enumerate() {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut content = message.content.replace('\n', " ").trim().to_string();
            if content.chars().count() > 160 {
                content = content.chars().take(157).collect::<String>() + "...";
            }
            let mut note = format!("{:02}. {role}: {content}", idx + 1);
            if let Some(id) = &message.tool_call_id {
                note.push_str(&format!(" (tool_call_id={id})"));
            }
            if let Some(calls) = &message.tool_calls {
                let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
                if !names.is_empty() {
                    note.push_str(&format!(" (tool_calls={})", names.join(",")));
                }
            }
            events.push(note);
        }
        if middle.len() > self.summary_event_limit {
            events.push(format!("... {} more messages omitted ...", middle.len() - self.summary_event_limit));
        }
        events.join("\n")
    }
}

// ─── Free helpers ─────────────────────────────────────────────────────────────

/// 4-chars-per-token estimate over everything beyond the `[system, user]`
/// head, mirroring how the engine-reported totals exclude neither — close
/// enough for the threshold comparison when no usage is known yet.
fn estimate_tokens(messages: &[Message]) -> u64 {
    if messages.len() <= 2 {
        return 0;
    }
    messages[2..].iter().map(Message::approx_tokens).sum()
}

/// True when every tool message references a surviving assistant tool call.
fn pairing_is_legal(messages: &[Message]) -> bool {
    let known: HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| c.id.as_str())
        .collect();
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .all(|m| m.tool_call_id.as_deref().is_some_and(|id| known.contains(id)))
}

fn sanitize_empty_assistant(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| !(m.role == Role::Assistant && !m.has_tool_calls() && m.content.trim().is_empty()))
        .collect()
}

fn normalize_orphan_tool_messages(messages: Vec<Message>) -> Vec<Message> {
    let known: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| c.id.clone())
        .collect();
    messages
        .into_iter()
        .filter(|m| {
            m.role != Role::Tool || m.tool_call_id.as_ref().is_some_and(|id| known.contains(id))
        })
        .collect()
}

/// Strip image payloads from user messages once an assistant turn has
/// processed them.
fn compact_processed_images(messages: Vec<Message>) -> Vec<Message> {
    let last_assistant = messages.iter().rposition(|m| m.role == Role::Assistant);
    let Some(last_assistant) = last_assistant else {
        return messages;
    };
    messages
        .into_iter()
        .enumerate()
        .map(|(idx, mut message)| {
            if message.role == Role::User && message.image_url.is_some() && idx < last_assistant {
                message.image_url = None;
                message.content = format!("{} [image payload compacted]", message.content).trim().to_string();
            }
            message
        })
        .collect()
}

/// Remove any prior summary message, remembering the last one.
fn extract_prior_summary(messages: Vec<Message>) -> (Vec<Message>, Option<Message>) {
    let mut prior = None;
    let kept = messages
        .into_iter()
        .filter_map(|message| {
            if message.role == Role::System && message.name.as_deref() == Some(MEMORY_SUMMARY_NAME) {
                prior = Some(message);
                None
            } else {
                Some(message)
            }
        })
        .collect();
    (kept, prior)
}

/// Put a summary back right after the `[system, user]` head.
fn reinstate_summary(mut messages: Vec<Message>, summary: Message) -> Vec<Message> {
    let head_size = messages.len().min(2);
    messages.insert(head_size, summary);
    messages
}

fn collect_summary_artifacts(summary: &Message) -> Vec<String> {
    let mut inside = false;
    let mut artifacts = Vec::new();
    for line in summary.content.lines() {
        match line.trim() {
            "<Persisted Artifacts>" => inside = true,
            "</Persisted Artifacts>" => inside = false,
            "(none)" => {}
            path if inside && !path.is_empty() => artifacts.push(path.to_string()),
            _ => {}
        }
    }
    artifacts
}

fn collect_compacted_artifacts(messages: &[Message]) -> Vec<String> {
    let mut artifacts = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::Tool) {
        if !message.content.starts_with(TOOL_RESULT_COMPACT_MARKER) {
            continue;
        }
        for line in message.content.lines() {
            if let Some(path) = line.trim().strip_prefix("artifact_path:") {
                let path = path.trim();
                if !path.is_empty() && path != "N/A" {
                    artifacts.push(path.to_string());
                }
            }
        }
    }
    artifacts
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rove_types::AssistantToolCall;
    use rove_workspace::{MemoryWorkspaceBackend, WorkspaceBackend};

    use super::*;

    struct FixedSummary(&'static str);

    #[async_trait]
    impl SummaryBackend for FixedSummary {
        async fn summarize(&self, _prompt: &str, _backend: Option<&str>, _model: Option<&str>) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn assistant_with_call(id: &str, name: &str) -> Message {
        let mut m = Message::assistant("");
        m.tool_calls = Some(vec![AssistantToolCall::new(id, name, "{}")]);
        m
    }

    fn history_with_tools(groups: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("sys"), Message::user("task")];
        for i in 0..groups {
            messages.push(assistant_with_call(&format!("c{i}"), "read_file"));
            messages.push(Message::tool_result(format!("c{i}"), format!("result {i}")));
        }
        messages
    }

    #[tokio::test]
    async fn under_threshold_and_legal_is_untouched() {
        let manager = MemoryManager::new(1_000_000);
        let messages = history_with_tools(2);
        let (result, changed) = manager.compact(&messages, Some(10), None, None).await;
        assert!(!changed);
        assert_eq!(result, messages);
    }

    #[tokio::test]
    async fn under_threshold_but_orphaned_is_repaired() {
        let manager = MemoryManager::new(1_000_000);
        let mut messages = history_with_tools(1);
        messages.push(Message::tool_result("ghost", "orphan result"));
        let (result, changed) = manager.compact(&messages, Some(10), None, None).await;
        assert!(changed);
        assert!(pairing_is_legal(&result));
        assert!(!result.iter().any(|m| m.content == "orphan result"));
    }

    #[tokio::test]
    async fn stale_tool_calls_are_stripped_keeping_last_k() {
        let manager = MemoryManager::new(0).with_tool_calls_keep_last(2);
        let messages = history_with_tools(5);
        let (result, changed) = manager.compact(&messages, Some(1), None, None).await;
        assert!(changed);
        let carriers: Vec<&Message> = result
            .iter()
            .filter(|m| m.role == Role::Assistant && m.has_tool_calls())
            .collect();
        assert_eq!(carriers.len(), 2);
        // Orphaned results of the stripped calls are gone too.
        assert!(pairing_is_legal(&result));
        let tool_count = result.iter().filter(|m| m.role == Role::Tool).count();
        assert_eq!(tool_count, 2);
    }

    #[tokio::test]
    async fn recent_tool_call_ids_are_protected() {
        let manager = MemoryManager::new(0).with_tool_calls_keep_last(1);
        let messages = history_with_tools(4);
        let recent: HashSet<String> = ["c0".to_string()].into();
        let (result, _) = manager.compact(&messages, Some(1), Some(&recent), None).await;
        let kept_ids: Vec<String> = result
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.tool_calls.iter().flatten())
            .map(|c| c.id.clone())
            .collect();
        assert!(kept_ids.contains(&"c0".to_string()), "protected id kept: {kept_ids:?}");
        assert!(kept_ids.contains(&"c3".to_string()), "most recent id kept: {kept_ids:?}");
    }

    #[tokio::test]
    async fn assistant_runs_collapse_to_last_n() {
        let manager = MemoryManager::new(0).with_assistant_no_tool_keep_last(1);
        let mut messages = vec![Message::system("s"), Message::user("u")];
        messages.push(Message::assistant("first"));
        messages.push(Message::assistant("second"));
        messages.push(Message::assistant("third"));
        messages.push(Message::user("next"));
        let (result, _) = manager.compact(&messages, Some(1), None, None).await;
        let texts: Vec<&str> = result
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(texts, vec!["third"]);
    }

    #[tokio::test]
    async fn processed_images_are_compacted() {
        let manager = MemoryManager::new(0);
        let mut messages = vec![Message::system("s"), Message::user("u")];
        messages.push(Message::user_with_image("look at this", "data:image/png;base64,AAA"));
        messages.push(Message::assistant("I looked"));
        let (result, _) = manager.compact(&messages, Some(1), None, None).await;
        let image_msg = result.iter().find(|m| m.content.contains("[image payload compacted]")).unwrap();
        assert!(image_msg.image_url.is_none());
        assert!(image_msg.content.starts_with("look at this"));
    }

    #[tokio::test]
    async fn unprocessed_trailing_image_is_kept() {
        let manager = MemoryManager::new(0);
        let mut messages = vec![Message::system("s"), Message::user("u"), Message::assistant("hi")];
        messages.push(Message::user_with_image("fresh image", "data:image/png;base64,AAA"));
        let (result, _) = manager.compact(&messages, Some(1), None, None).await;
        let image_msg = result.iter().find(|m| m.content.starts_with("fresh image")).unwrap();
        assert!(image_msg.image_url.is_some(), "image after last assistant stays inline");
    }

    #[tokio::test]
    async fn oversized_tool_results_become_artifacts() {
        let workspace = Arc::new(MemoryWorkspaceBackend::new());
        let manager = MemoryManager::new(0)
            .with_tool_result_limits(100, 1, 20, 20)
            .with_workspace_backend(Arc::clone(&workspace) as Arc<dyn WorkspaceBackend>);

        let big = "x".repeat(500);
        let mut messages = vec![Message::system("s"), Message::user("u")];
        messages.push(assistant_with_call("c1", "read_file"));
        messages.push(Message::tool_result("c1", big.clone()));
        messages.push(assistant_with_call("c2", "read_file"));
        messages.push(Message::tool_result("c2", big.clone()));

        let (result, _) = manager.compact(&messages, Some(1), None, Some(4)).await;

        let compacted: Vec<&Message> = result
            .iter()
            .filter(|m| m.content.starts_with(TOOL_RESULT_COMPACT_MARKER))
            .collect();
        assert_eq!(compacted.len(), 1, "last tool result is kept verbatim");
        assert!(compacted[0].content.contains("artifact_path: .memory/tool_results/cycle_4/c1.txt"));
        assert!(compacted[0].content.contains("total_chars: 500"));
        assert!(compacted[0].content.contains("...<snip>..."));
        assert_eq!(workspace.read_text(".memory/tool_results/cycle_4/c1.txt").unwrap(), big);
    }

    fn summarizable_history() -> Vec<Message> {
        let mut messages = vec![Message::system("sys"), Message::user("the big task")];
        for i in 0..12 {
            messages.push(Message::user(format!("step request {i} {}", "pad ".repeat(50))));
            messages.push(Message::assistant(format!("step reply {i} {}", "pad ".repeat(50))));
        }
        messages
    }

    #[tokio::test]
    async fn summarization_keeps_head_and_recent_tail() {
        let manager = MemoryManager::new(80)
            .with_keep_recent_messages(2)
            .with_summary_backend(Arc::new(FixedSummary("digest of events")), None, None);
        let messages = summarizable_history();
        let (result, changed) = manager.compact(&messages, Some(5_000), None, None).await;
        assert!(changed);
        assert_eq!(result[0].content, "sys");
        assert_eq!(result[1].content, "the big task");
        let summaries: Vec<&Message> = result
            .iter()
            .filter(|m| m.name.as_deref() == Some(MEMORY_SUMMARY_NAME))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].content.contains("<Compressed Agent Memory>"));
        assert!(summaries[0].content.contains("digest of events"));
        assert!(summaries[0].content.contains("<Persisted Artifacts>"));
        // Head + summary + the 2 retained messages.
        assert_eq!(result.len(), 5);
        assert_eq!(result[3..], messages[messages.len() - 2..]);
    }

    #[tokio::test]
    async fn summary_enumerates_persisted_artifacts() {
        let workspace = Arc::new(MemoryWorkspaceBackend::new());
        let manager = MemoryManager::new(80)
            .with_keep_recent_messages(2)
            .with_tool_result_limits(50, 0, 10, 10)
            .with_workspace_backend(workspace as Arc<dyn WorkspaceBackend>)
            .with_summary_backend(Arc::new(FixedSummary("digest")), None, None);

        let mut messages = vec![Message::system("s"), Message::user("u")];
        messages.push(assistant_with_call("call-a", "workspace_grep"));
        messages.push(Message::tool_result("call-a", "m".repeat(400)));
        for i in 0..10 {
            messages.push(Message::user(format!("filler {i} {}", "pad ".repeat(40))));
            messages.push(Message::assistant(format!("reply {i} {}", "pad ".repeat(40))));
        }
        let (result, _) = manager.compact(&messages, Some(10_000), None, Some(7)).await;
        let summary = result
            .iter()
            .find(|m| m.name.as_deref() == Some(MEMORY_SUMMARY_NAME))
            .expect("summary present");
        assert!(
            summary.content.contains(".memory/tool_results/cycle_7/call-a.txt"),
            "artifact path must be enumerated: {}",
            summary.content
        );
    }

    #[tokio::test]
    async fn compact_is_idempotent() {
        let manager = MemoryManager::new(80)
            .with_keep_recent_messages(2)
            .with_summary_backend(Arc::new(FixedSummary("stable digest")), None, None);
        let messages = summarizable_history();
        let (once, _) = manager.compact(&messages, Some(5_000), None, None).await;
        let (twice, changed) = manager.compact(&once, Some(5_000), None, None).await;
        assert_eq!(twice, once, "compact(compact(x)) == compact(x)");
        assert!(!changed);
    }

    #[tokio::test]
    async fn pairing_preserved_after_full_compaction() {
        let manager = MemoryManager::new(80)
            .with_keep_recent_messages(3)
            .with_tool_calls_keep_last(1)
            .with_summary_backend(Arc::new(FixedSummary("d")), None, None);
        let messages = history_with_tools(10);
        let (result, _) = manager.compact(&messages, Some(50_000), None, None).await;
        assert!(pairing_is_legal(&result));
    }

    #[tokio::test]
    async fn memory_warning_appended_once() {
        let manager = MemoryManager::new(100).with_memory_warning(true, 90);
        let messages = vec![Message::system("s"), Message::user("u"), Message::assistant("a")];
        let (warned, changed) = manager.compact(&messages, Some(95), None, None).await;
        assert!(changed);
        assert!(warned.last().unwrap().content.contains("Memory usage has exceeded 90%"));

        let (again, changed_again) = manager.compact(&warned, Some(95), None, None).await;
        assert!(!changed_again, "warning must not duplicate");
        assert_eq!(again, warned);
    }

    #[tokio::test]
    async fn empty_input_passes_through() {
        let manager = MemoryManager::new(100);
        let (result, changed) = manager.compact(&[], Some(1_000_000), None, None).await;
        assert!(result.is_empty());
        assert!(!changed);
    }
}
