// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use rove_types::{StateMap, ToolExecutionResult};

use crate::builtin::common::arg_str;
use crate::context::ToolContext;
use crate::registry::Tool;

const ALLOWED_EXTENSIONS: [(&str, &str); 5] = [
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".webp", "image/webp"),
    (".bmp", "image/bmp"),
];
const MAX_INLINE_IMAGE_BYTES: usize = 5 * 1024 * 1024;

fn error(message: String, error_code: &str) -> ToolExecutionResult {
    ToolExecutionResult::error(
        json!({"error": message, "error_code": error_code}).to_string(),
        error_code,
    )
}

/// Loads a workspace image as an inline data URL, or passes an http(s) URL
/// through untouched.  No decoding happens here; the tool-call runner turns
/// the attached `image_url` into a user-visible notification message for
/// multimodal tasks.
pub struct ReadImageTool;

#[async_trait]
impl Tool for ReadImageTool {
    fn name(&self) -> &str {
        "read_image"
    }

    fn description(&self) -> &str {
        "Load an image from the workspace (jpg/jpeg/png/webp/bmp, max 5 MiB)\n\
         or reference an http(s) URL so the model can see it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative image path or http(s) URL"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &StateMap) -> anyhow::Result<ToolExecutionResult> {
        let raw_path = arg_str(args, "path").unwrap_or("").trim().to_string();
        if raw_path.is_empty() {
            return Ok(error("`path` is required".into(), "path_required"));
        }

        let lowered = raw_path.to_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            let mut payload = StateMap::new();
            payload.insert("status".into(), json!("loaded"));
            payload.insert("source".into(), json!("url"));
            payload.insert("image_url".into(), json!(raw_path));
            return Ok(
                ToolExecutionResult::success(Value::Object(payload.clone()).to_string())
                    .with_metadata(payload)
                    .with_image(Some(raw_path), None),
            );
        }

        let backend = &ctx.workspace_backend;
        if !backend.exists(&raw_path) || !backend.is_file(&raw_path) {
            return Ok(error(format!("image file not found: {raw_path}"), "image_not_found"));
        }

        let suffix = raw_path
            .rfind('.')
            .map(|idx| raw_path[idx..].to_lowercase())
            .unwrap_or_default();
        let Some((_, mime_type)) = ALLOWED_EXTENSIONS.iter().find(|(ext, _)| *ext == suffix) else {
            return Ok(error(
                format!("unsupported image format: {suffix}"),
                "unsupported_image_format",
            ));
        };

        let bytes = backend.read_bytes(&raw_path)?;
        if bytes.len() > MAX_INLINE_IMAGE_BYTES {
            return Ok(ToolExecutionResult::error(
                json!({
                    "error": "image is too large for inline message transport",
                    "error_code": "image_too_large",
                    "max_bytes": MAX_INLINE_IMAGE_BYTES,
                    "actual_bytes": bytes.len(),
                })
                .to_string(),
                "image_too_large",
            ));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let image_url = format!("data:{mime_type};base64,{encoded}");
        let mut payload = StateMap::new();
        payload.insert("status".into(), json!("loaded"));
        payload.insert("source".into(), json!("workspace"));
        payload.insert("image_path".into(), json!(raw_path));
        payload.insert("mime_type".into(), json!(mime_type));
        payload.insert("inline_transport".into(), json!(true));

        Ok(
            ToolExecutionResult::success(Value::Object(payload.clone()).to_string())
                .with_metadata(payload)
                .with_image(Some(image_url), Some(raw_path)),
        )
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
