// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::Utc;

use crate::backend::{path_suffix, FileInfo, WorkspaceBackend, WorkspaceError};
use crate::glob::glob_match;

/// In-memory workspace backend for tests and ephemeral runs.
///
/// Directories exist implicitly for every file prefix and explicitly via
/// `mkdir`.  Path normalization mirrors the local backend: relative POSIX
/// paths only, `..` rejected.
#[derive(Default)]
pub struct MemoryWorkspaceBackend {
    inner: Mutex<Store>,
}

#[derive(Default)]
struct Store {
    files: BTreeMap<String, FileEntry>,
    dirs: BTreeSet<String>,
}

struct FileEntry {
    bytes: Vec<u8>,
    modified_at: String,
}

impl MemoryWorkspaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(path: &str) -> Result<String, WorkspaceError> {
        if path.starts_with('/') {
            return Err(WorkspaceError::PathEscape(path.to_string()));
        }
        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(WorkspaceError::PathEscape(path.to_string()));
                    }
                }
                other => parts.push(other),
            }
        }
        Ok(parts.join("/"))
    }

    fn dir_exists(store: &Store, normalized: &str) -> bool {
        if normalized.is_empty() || store.dirs.contains(normalized) {
            return true;
        }
        let prefix = format!("{normalized}/");
        store.files.keys().any(|k| k.starts_with(&prefix))
            || store.dirs.iter().any(|d| d.starts_with(&prefix))
    }
}

impl WorkspaceBackend for MemoryWorkspaceBackend {
    fn list_files(&self, base: &str, glob: &str) -> Result<Vec<String>, WorkspaceError> {
        let base = Self::normalize(base)?;
        let pattern = if glob.is_empty() { "**/*" } else { glob };
        let store = self.inner.lock().expect("workspace lock");
        if !Self::dir_exists(&store, &base) {
            return Ok(Vec::new());
        }
        let prefix = if base.is_empty() { String::new() } else { format!("{base}/") };
        let mut files: Vec<String> = store
            .files
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .filter(|key| glob_match(&key[prefix.len()..], pattern))
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_text(&self, path: &str) -> Result<String, WorkspaceError> {
        Ok(String::from_utf8_lossy(&self.read_bytes(path)?).into_owned())
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let key = Self::normalize(path)?;
        let store = self.inner.lock().expect("workspace lock");
        store
            .files
            .get(&key)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| WorkspaceError::NotFound(path.to_string()))
    }

    fn write_text(&self, path: &str, content: &str, append: bool) -> Result<usize, WorkspaceError> {
        let key = Self::normalize(path)?;
        if key.is_empty() {
            return Err(WorkspaceError::NotAFile(path.to_string()));
        }
        let mut store = self.inner.lock().expect("workspace lock");
        let now = Utc::now().to_rfc3339();
        match store.files.get_mut(&key) {
            Some(entry) if append => {
                entry.bytes.extend_from_slice(content.as_bytes());
                entry.modified_at = now;
            }
            _ => {
                store.files.insert(
                    key,
                    FileEntry {
                        bytes: content.as_bytes().to_vec(),
                        modified_at: now,
                    },
                );
            }
        }
        Ok(content.chars().count())
    }

    fn file_info(&self, path: &str) -> Result<Option<FileInfo>, WorkspaceError> {
        let key = Self::normalize(path)?;
        let store = self.inner.lock().expect("workspace lock");
        if let Some(entry) = store.files.get(&key) {
            return Ok(Some(FileInfo {
                suffix: path_suffix(&key),
                path: key,
                is_file: true,
                is_dir: false,
                size: entry.bytes.len() as u64,
                modified_at: entry.modified_at.clone(),
            }));
        }
        if Self::dir_exists(&store, &key) && !key.is_empty() {
            return Ok(Some(FileInfo {
                suffix: String::new(),
                path: key,
                is_file: false,
                is_dir: true,
                size: 0,
                modified_at: String::new(),
            }));
        }
        Ok(None)
    }

    fn exists(&self, path: &str) -> bool {
        let Ok(key) = Self::normalize(path) else {
            return false;
        };
        let store = self.inner.lock().expect("workspace lock");
        store.files.contains_key(&key) || Self::dir_exists(&store, &key)
    }

    fn is_file(&self, path: &str) -> bool {
        let Ok(key) = Self::normalize(path) else {
            return false;
        };
        self.inner.lock().expect("workspace lock").files.contains_key(&key)
    }

    fn mkdir(&self, path: &str) -> Result<(), WorkspaceError> {
        let key = Self::normalize(path)?;
        if !key.is_empty() {
            self.inner.lock().expect("workspace lock").dirs.insert(key);
        }
        Ok(())
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
