// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::backend::{path_suffix, FileInfo, WorkspaceBackend, WorkspaceError};
use crate::glob::glob_match;

/// Filesystem-rooted workspace backend.
///
/// Every path is resolved against the root and rejected if it climbs out
/// (`..`, absolute paths).  Resolution is purely lexical so that paths to
/// not-yet-created files can still be validated.
pub struct LocalWorkspaceBackend {
    root: PathBuf,
}

impl LocalWorkspaceBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexical resolution against the root: `.` segments vanish, `..` pops,
    /// and popping past the root (or an absolute input) is an escape.
    fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Err(WorkspaceError::PathEscape(path.to_string()));
        }
        let mut parts: Vec<std::ffi::OsString> = Vec::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_os_string()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(WorkspaceError::PathEscape(path.to_string()));
                    }
                }
                _ => return Err(WorkspaceError::PathEscape(path.to_string())),
            }
        }
        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(resolved)
    }

    fn relative(&self, target: &Path) -> String {
        target
            .strip_prefix(&self.root)
            .unwrap_or(target)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn io_err(path: &str, source: std::io::Error) -> WorkspaceError {
        WorkspaceError::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl WorkspaceBackend for LocalWorkspaceBackend {
    fn list_files(&self, base: &str, glob: &str) -> Result<Vec<String>, WorkspaceError> {
        let root = self.resolve(base)?;
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = if glob.is_empty() { "**/*" } else { glob };

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_from_base = match entry.path().strip_prefix(&root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if !glob_match(&rel_from_base, pattern) {
                continue;
            }
            files.push(self.relative(entry.path()));
        }
        files.sort();
        Ok(files)
    }

    fn read_text(&self, path: &str) -> Result<String, WorkspaceError> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(WorkspaceError::NotFound(path.to_string()));
        }
        let bytes = fs::read(&target).map_err(|e| Self::io_err(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>, WorkspaceError> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(WorkspaceError::NotFound(path.to_string()));
        }
        fs::read(&target).map_err(|e| Self::io_err(path, e))
    }

    fn write_text(&self, path: &str, content: &str, append: bool) -> Result<usize, WorkspaceError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(path, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&target)
            .map_err(|e| Self::io_err(path, e))?;
        file.write_all(content.as_bytes()).map_err(|e| Self::io_err(path, e))?;
        Ok(content.chars().count())
    }

    fn file_info(&self, path: &str) -> Result<Option<FileInfo>, WorkspaceError> {
        let target = self.resolve(path)?;
        let metadata = match fs::metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(path, e)),
        };
        let modified_at = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_default();
        let rel = self.relative(&target);
        Ok(Some(FileInfo {
            suffix: path_suffix(&rel),
            path: rel,
            is_file: metadata.is_file(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified_at,
        }))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_file(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn mkdir(&self, path: &str) -> Result<(), WorkspaceError> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target).map_err(|e| Self::io_err(path, e))
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalWorkspaceBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = LocalWorkspaceBackend::new(dir.path());
        (dir, backend)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, ws) = backend();
        ws.write_text("notes/hello.txt", "hi there", false).unwrap();
        assert_eq!(ws.read_text("notes/hello.txt").unwrap(), "hi there");
    }

    #[test]
    fn append_extends_existing_content() {
        let (_dir, ws) = backend();
        ws.write_text("log.txt", "one\n", false).unwrap();
        ws.write_text("log.txt", "two\n", true).unwrap();
        assert_eq!(ws.read_text("log.txt").unwrap(), "one\ntwo\n");
    }

    #[test]
    fn overwrite_truncates() {
        let (_dir, ws) = backend();
        ws.write_text("f.txt", "a longer original", false).unwrap();
        ws.write_text("f.txt", "short", false).unwrap();
        assert_eq!(ws.read_text("f.txt").unwrap(), "short");
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let (_dir, ws) = backend();
        assert!(matches!(ws.read_text("absent.txt"), Err(WorkspaceError::NotFound(_))));
    }

    #[test]
    fn rejects_parent_escape() {
        let (_dir, ws) = backend();
        assert!(matches!(
            ws.read_text("../outside.txt"),
            Err(WorkspaceError::PathEscape(_))
        ));
        assert!(matches!(
            ws.write_text("a/../../evil.txt", "x", false),
            Err(WorkspaceError::PathEscape(_))
        ));
    }

    #[test]
    fn non_escaping_dotdot_is_allowed() {
        let (_dir, ws) = backend();
        ws.write_text("a/../b.txt", "inside", false).unwrap();
        assert_eq!(ws.read_text("b.txt").unwrap(), "inside");
    }

    #[test]
    fn rejects_absolute_paths() {
        let (_dir, ws) = backend();
        assert!(matches!(ws.read_text("/etc/hosts"), Err(WorkspaceError::PathEscape(_))));
    }

    #[test]
    fn list_files_filters_by_glob_and_sorts() {
        let (_dir, ws) = backend();
        ws.write_text("src/main.rs", "", false).unwrap();
        ws.write_text("src/util/helper.rs", "", false).unwrap();
        ws.write_text("README.md", "", false).unwrap();
        let rust = ws.list_files(".", "**/*.rs").unwrap();
        assert_eq!(rust, vec!["src/main.rs", "src/util/helper.rs"]);
        let all = ws.list_files(".", "**/*").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn list_files_relative_to_base() {
        let (_dir, ws) = backend();
        ws.write_text("src/a.rs", "", false).unwrap();
        ws.write_text("docs/b.md", "", false).unwrap();
        // Glob is applied relative to base, results stay workspace-relative.
        let listed = ws.list_files("src", "*.rs").unwrap();
        assert_eq!(listed, vec!["src/a.rs"]);
    }

    #[test]
    fn list_files_missing_base_is_empty() {
        let (_dir, ws) = backend();
        assert!(ws.list_files("nowhere", "**/*").unwrap().is_empty());
    }

    #[test]
    fn file_info_reports_metadata() {
        let (_dir, ws) = backend();
        ws.write_text("data/report.txt", "12345", false).unwrap();
        let info = ws.file_info("data/report.txt").unwrap().expect("info");
        assert_eq!(info.path, "data/report.txt");
        assert!(info.is_file);
        assert!(!info.is_dir);
        assert_eq!(info.size, 5);
        assert_eq!(info.suffix, ".txt");
        assert!(!info.modified_at.is_empty());
    }

    #[test]
    fn file_info_none_for_missing() {
        let (_dir, ws) = backend();
        assert!(ws.file_info("nope").unwrap().is_none());
    }

    #[test]
    fn mkdir_creates_nested_directories() {
        let (_dir, ws) = backend();
        ws.mkdir("a/b/c").unwrap();
        assert!(ws.exists("a/b/c"));
        assert!(!ws.is_file("a/b/c"));
    }
}
