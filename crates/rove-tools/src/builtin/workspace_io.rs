// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};

use rove_types::{StateMap, ToolExecutionResult};

use crate::builtin::common::{arg_bool, arg_str, arg_u64};
use crate::context::ToolContext;
use crate::registry::Tool;

fn io_error(message: String, error_code: &str) -> ToolExecutionResult {
    ToolExecutionResult::error(
        json!({"error": message, "error_code": error_code}).to_string(),
        error_code,
    )
}

fn hidden(path: &str) -> bool {
    path.split('/').any(|part| part.starts_with('.'))
}

/// Lists workspace files matched by a glob.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List workspace files. Glob supports `**`, `*` and `?`; hidden files\n\
         are excluded unless include_hidden is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "default": "." },
                "glob": { "type": "string", "default": "**/*" },
                "include_hidden": { "type": "boolean", "default": false }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let path = arg_str(args, "path").unwrap_or(".");
        let glob = arg_str(args, "glob").unwrap_or("**/*");
        let include_hidden = arg_bool(args, "include_hidden", false);

        let mut files = match ctx.workspace_backend.list_files(path, glob) {
            Ok(files) => files,
            Err(err) => return Ok(io_error(err.to_string(), "list_failed")),
        };
        if !include_hidden {
            files.retain(|f| !hidden(f));
        }
        files.sort();
        Ok(ToolExecutionResult::success(
            json!({"files": files, "count": files.len()}).to_string(),
        ))
    }
}

/// Reads file content, optionally restricted to a line range.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a workspace file with an optional 1-based line range."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1, "default": 1 },
                "end_line": { "type": "integer", "minimum": 1 }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(path) = arg_str(args, "path") else {
            return Ok(io_error("`path` is required".into(), "path_required"));
        };
        if !ctx.workspace_backend.is_file(path) {
            return Ok(io_error(format!("file not found: {path}"), "file_not_found"));
        }
        let text = match ctx.workspace_backend.read_text(path) {
            Ok(text) => text,
            Err(err) => return Ok(io_error(err.to_string(), "read_failed")),
        };
        let lines: Vec<&str> = text.lines().collect();

        let start_line = arg_u64(args, "start_line", 1).max(1) as usize;
        let end_line = args
            .get("end_line")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(lines.len());

        let start_idx = start_line - 1;
        let end_idx = end_line.max(start_idx).min(lines.len());
        let selected = if start_idx < lines.len() { &lines[start_idx..end_idx] } else { &[] };

        Ok(ToolExecutionResult::success(
            json!({
                "path": path,
                "start_line": start_idx + 1,
                "end_line": start_idx + selected.len(),
                "content": selected.join("\n"),
            })
            .to_string(),
        ))
    }
}

/// Writes (or appends) text into the workspace.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text into a workspace file, creating parent directories.\n\
         Set append=true to extend instead of overwrite."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "append": { "type": "boolean", "default": false }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(path) = arg_str(args, "path") else {
            return Ok(io_error("`path` is required".into(), "path_required"));
        };
        let content = arg_str(args, "content").unwrap_or("");
        let append = arg_bool(args, "append", false);

        match ctx.workspace_backend.write_text(path, content, append) {
            Ok(written) => Ok(ToolExecutionResult::success(
                json!({"ok": true, "path": path, "written_chars": written}).to_string(),
            )),
            Err(err) => Ok(io_error(err.to_string(), "write_failed")),
        }
    }
}

/// Replaces occurrences of a literal string inside one file.
pub struct FileStrReplaceTool;

#[async_trait]
impl Tool for FileStrReplaceTool {
    fn name(&self) -> &str {
        "file_str_replace"
    }

    fn description(&self) -> &str {
        "Replace a literal string in a workspace file.\n\
         Replaces the first max_replacements occurrences (default 1), or all\n\
         of them when replace_all is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_str": { "type": "string" },
                "new_str": { "type": "string", "default": "" },
                "replace_all": { "type": "boolean", "default": false },
                "max_replacements": { "type": "integer", "minimum": 1, "default": 1 }
            },
            "required": ["path", "old_str"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(path) = arg_str(args, "path") else {
            return Ok(io_error("`path` is required".into(), "path_required"));
        };
        if !ctx.workspace_backend.is_file(path) {
            return Ok(io_error(format!("file not found: {path}"), "file_not_found"));
        }
        let old_str = arg_str(args, "old_str").unwrap_or("");
        if old_str.is_empty() {
            return Ok(io_error("`old_str` cannot be empty".into(), "old_str_required"));
        }
        let new_str = arg_str(args, "new_str").unwrap_or("");
        let replace_all = arg_bool(args, "replace_all", false);
        let max_replacements = arg_u64(args, "max_replacements", 1).max(1) as usize;

        let text = match ctx.workspace_backend.read_text(path) {
            Ok(text) => text,
            Err(err) => return Ok(io_error(err.to_string(), "read_failed")),
        };
        let occurrences = text.matches(old_str).count();
        if occurrences == 0 {
            return Ok(io_error("`old_str` not found in file".into(), "old_str_not_found"));
        }

        let (replaced_text, replaced_count) = if replace_all {
            (text.replace(old_str, new_str), occurrences)
        } else {
            (
                text.replacen(old_str, new_str, max_replacements),
                occurrences.min(max_replacements),
            )
        };

        if let Err(err) = ctx.workspace_backend.write_text(path, &replaced_text, false) {
            return Ok(io_error(err.to_string(), "write_failed"));
        }
        Ok(ToolExecutionResult::success(
            json!({"ok": true, "path": path, "replaced_count": replaced_count}).to_string(),
        ))
    }
}

/// Regex search across workspace files.
pub struct WorkspaceGrepTool;

#[async_trait]
impl Tool for WorkspaceGrepTool {
    fn name(&self) -> &str {
        "workspace_grep"
    }

    fn description(&self) -> &str {
        "Search workspace files line by line with a regex.\n\
         Case-insensitive by default; results cap at max_results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string", "default": "." },
                "glob": { "type": "string", "default": "**/*" },
                "case_sensitive": { "type": "boolean", "default": false },
                "max_results": { "type": "integer", "minimum": 1, "default": 50 }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let Some(pattern) = arg_str(args, "pattern") else {
            return Ok(io_error("`pattern` is required".into(), "pattern_required"));
        };
        let path = arg_str(args, "path").unwrap_or(".");
        let glob = arg_str(args, "glob").unwrap_or("**/*");
        let case_sensitive = arg_bool(args, "case_sensitive", false);
        let max_results = arg_u64(args, "max_results", 50).max(1) as usize;

        let regex = match RegexBuilder::new(pattern).case_insensitive(!case_sensitive).build() {
            Ok(regex) => regex,
            Err(err) => return Ok(io_error(format!("invalid pattern: {err}"), "invalid_pattern")),
        };

        let files = match ctx.workspace_backend.list_files(path, glob) {
            Ok(files) => files,
            Err(err) => return Ok(io_error(err.to_string(), "list_failed")),
        };

        let mut matches: Vec<Value> = Vec::new();
        for file in files {
            // Unreadable or binary-ish files are skipped, not fatal.
            let Ok(content) = ctx.workspace_backend.read_text(&file) else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(json!({"path": file, "line": line_no + 1, "text": line}));
                    if matches.len() >= max_results {
                        return Ok(ToolExecutionResult::success(
                            json!({"matches": matches, "truncated": true}).to_string(),
                        ));
                    }
                }
            }
        }
        Ok(ToolExecutionResult::success(
            json!({"matches": matches, "truncated": false}).to_string(),
        ))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rove_types::shared_state;
    use rove_workspace::{MemoryWorkspaceBackend, WorkspaceBackend};

    use super::*;

    fn context() -> ToolContext {
        let backend = MemoryWorkspaceBackend::new();
        backend.write_text("src/lib.rs", "pub fn alpha() {}\npub fn beta() {}\n", false).unwrap();
        backend.write_text("notes.md", "alpha notes\nBeta NOTES\n", false).unwrap();
        backend.write_text(".hidden/secret.txt", "shh", false).unwrap();
        ToolContext::new(
            std::path::PathBuf::from("/ws"),
            Arc::new(backend),
            shared_state(None),
        )
    }

    fn args(value: Value) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn payload(result: &ToolExecutionResult) -> Value {
        serde_json::from_str(&result.content).unwrap()
    }

    #[tokio::test]
    async fn list_files_excludes_hidden_by_default() {
        let ctx = context();
        let result = ListFilesTool.execute(&ctx, &args(json!({}))).await.unwrap();
        let body = payload(&result);
        assert_eq!(body["count"], 2);
        assert!(!body["files"].to_string().contains(".hidden"));
    }

    #[tokio::test]
    async fn list_files_can_include_hidden() {
        let ctx = context();
        let result = ListFilesTool
            .execute(&ctx, &args(json!({"include_hidden": true})))
            .await
            .unwrap();
        assert_eq!(payload(&result)["count"], 3);
    }

    #[tokio::test]
    async fn read_file_full_and_ranged() {
        let ctx = context();
        let full = ReadFileTool
            .execute(&ctx, &args(json!({"path": "src/lib.rs"})))
            .await
            .unwrap();
        let body = payload(&full);
        assert_eq!(body["start_line"], 1);
        assert_eq!(body["end_line"], 2);

        let ranged = ReadFileTool
            .execute(&ctx, &args(json!({"path": "src/lib.rs", "start_line": 2, "end_line": 2})))
            .await
            .unwrap();
        let body = payload(&ranged);
        assert_eq!(body["content"], "pub fn beta() {}");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let ctx = context();
        let result = ReadFileTool
            .execute(&ctx, &args(json!({"path": "nope.txt"})))
            .await
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("file_not_found"));
    }

    #[tokio::test]
    async fn write_file_reports_written_chars() {
        let ctx = context();
        let result = WriteFileTool
            .execute(&ctx, &args(json!({"path": "out/new.txt", "content": "hello"})))
            .await
            .unwrap();
        assert_eq!(payload(&result)["written_chars"], 5);
        assert_eq!(ctx.workspace_backend.read_text("out/new.txt").unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_file_append_mode() {
        let ctx = context();
        WriteFileTool
            .execute(&ctx, &args(json!({"path": "log.txt", "content": "a"})))
            .await
            .unwrap();
        WriteFileTool
            .execute(&ctx, &args(json!({"path": "log.txt", "content": "b", "append": true})))
            .await
            .unwrap();
        assert_eq!(ctx.workspace_backend.read_text("log.txt").unwrap(), "ab");
    }

    #[tokio::test]
    async fn str_replace_single_occurrence_by_default() {
        let ctx = context();
        ctx.workspace_backend.write_text("x.txt", "aaa", false).unwrap();
        let result = FileStrReplaceTool
            .execute(&ctx, &args(json!({"path": "x.txt", "old_str": "a", "new_str": "b"})))
            .await
            .unwrap();
        assert_eq!(payload(&result)["replaced_count"], 1);
        assert_eq!(ctx.workspace_backend.read_text("x.txt").unwrap(), "baa");
    }

    #[tokio::test]
    async fn str_replace_all_occurrences() {
        let ctx = context();
        ctx.workspace_backend.write_text("x.txt", "aaa", false).unwrap();
        let result = FileStrReplaceTool
            .execute(
                &ctx,
                &args(json!({"path": "x.txt", "old_str": "a", "new_str": "b", "replace_all": true})),
            )
            .await
            .unwrap();
        assert_eq!(payload(&result)["replaced_count"], 3);
        assert_eq!(ctx.workspace_backend.read_text("x.txt").unwrap(), "bbb");
    }

    #[tokio::test]
    async fn str_replace_missing_needle_errors() {
        let ctx = context();
        let result = FileStrReplaceTool
            .execute(&ctx, &args(json!({"path": "notes.md", "old_str": "gamma"})))
            .await
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("old_str_not_found"));
    }

    #[tokio::test]
    async fn grep_case_insensitive_by_default() {
        let ctx = context();
        let result = WorkspaceGrepTool
            .execute(&ctx, &args(json!({"pattern": "notes", "glob": "**/*.md"})))
            .await
            .unwrap();
        let body = payload(&result);
        assert_eq!(body["matches"].as_array().unwrap().len(), 2);
        assert_eq!(body["truncated"], false);
    }

    #[tokio::test]
    async fn grep_truncates_at_max_results() {
        let ctx = context();
        let result = WorkspaceGrepTool
            .execute(&ctx, &args(json!({"pattern": "pub fn", "max_results": 1})))
            .await
            .unwrap();
        let body = payload(&result);
        assert_eq!(body["matches"].as_array().unwrap().len(), 1);
        assert_eq!(body["truncated"], true);
    }

    #[tokio::test]
    async fn grep_invalid_pattern_errors() {
        let ctx = context();
        let result = WorkspaceGrepTool
            .execute(&ctx, &args(json!({"pattern": "(unclosed"})))
            .await
            .unwrap();
        assert_eq!(result.error_code.as_deref(), Some("invalid_pattern"));
    }
}
