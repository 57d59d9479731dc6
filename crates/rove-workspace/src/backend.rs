// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Metadata for one workspace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Workspace-relative POSIX path.
    pub path: String,
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
    /// UTC ISO-8601 modification time.
    pub modified_at: String,
    /// File extension including the leading dot, empty when none.
    pub suffix: String,
}

/// Contract every workspace store fulfils.
///
/// Operations are synchronous; payloads are small and the callers (tool
/// handlers, the memory manager) invoke them directly from async contexts.
pub trait WorkspaceBackend: Send + Sync {
    /// List files under `base` whose path relative to `base` matches `glob`
    /// (`**`, `*`, `?` supported).  Returned paths are workspace-relative
    /// and sorted.  A missing or non-directory `base` yields an empty list.
    fn list_files(&self, base: &str, glob: &str) -> Result<Vec<String>, WorkspaceError>;

    fn read_text(&self, path: &str) -> Result<String, WorkspaceError>;

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, WorkspaceError>;

    /// Write (or append) text, creating parent directories as needed.
    /// Returns the number of characters written.
    fn write_text(&self, path: &str, content: &str, append: bool) -> Result<usize, WorkspaceError>;

    /// Metadata for `path`, `None` when it does not exist.
    fn file_info(&self, path: &str) -> Result<Option<FileInfo>, WorkspaceError>;

    fn exists(&self, path: &str) -> bool;

    fn is_file(&self, path: &str) -> bool;

    fn mkdir(&self, path: &str) -> Result<(), WorkspaceError>;
}

/// Suffix (extension with leading dot) of a POSIX-style relative path.
pub(crate) fn path_suffix(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    }
}
