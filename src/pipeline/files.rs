// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Files flowing into the pipeline and the change set flowing out of it.
//!
//! The source-control host is an external collaborator: the pipeline only
//! needs something that yields [`FileDetails`] before a run and something that
//! accepts a [`PullRequestDraft`] after it. [`LocalSource`] and
//! [`JsonDraftWriter`] are the local-disk implementations used by the CLI.

use crate::utils::error::ForgeError;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One candidate file. Never mutated after it has been annotated with a
/// token count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl FileDetails {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            token_count: None,
        }
    }

    pub fn with_token_count(mut self, token_count: usize) -> Self {
        self.token_count = Some(token_count);
        self
    }

    /// The exact text this file contributes to a prompt.
    pub fn to_prompt_entry(&self) -> String {
        format!(
            "<file>\n<file_path>{}</file_path>\n<file_contents>{}</file_contents>\n</file>",
            self.path, self.content
        )
    }
}

/// A file created or rewritten by the coding stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Everything needed to open a pull request for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDraft {
    #[serde(default)]
    pub pr_title: String,
    #[serde(default)]
    pub new_files: Vec<FileChange>,
    #[serde(default)]
    pub modified_files: Vec<FileChange>,
    #[serde(default)]
    pub deleted_files: Vec<String>,
}

impl PullRequestDraft {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.modified_files.is_empty() && self.deleted_files.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.new_files.len() + self.modified_files.len() + self.deleted_files.len()
    }
}

/// Supplies the candidate files for a run.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_files(&self) -> Result<Vec<FileDetails>, ForgeError>;
}

/// Receives the change set produced by a run. Returns a reference to what
/// was created (a URL, a path, an id).
#[async_trait]
pub trait PullRequestSink: Send + Sync {
    async fn submit(&self, draft: &PullRequestDraft) -> Result<String, ForgeError>;
}

/// Directories never sent to a model.
const EXCLUDED_DIRECTORIES: &[&str] = &[
    "node_modules/",
    "target/",
    "build/",
    "dist/",
    "out/",
    "coverage/",
    "storybook-static/",
    "__pycache__/",
    "venv/",
    "artifacts/",
    "tmp/",
    "temp/",
    "logs/",
];

const EXCLUDED_SUFFIXES: &[&str] = &[
    ".min.js", ".min.css", ".map", ".tsbuildinfo", ".snap", ".log", ".tmp", ".bak", ".cache",
    ".lock", ".tar.gz", ".zip", ".7z", ".rar", ".class", ".o", ".so", ".dll", ".exe", ".bin",
    ".dylib", ".pyc", ".pyo", ".pyd", ".sqlite", ".db", ".mp3", ".mp4", ".avi", ".mkv", ".mov",
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".ico", ".svg", ".tif", ".tiff", ".webp", ".psd",
    ".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx", ".env",
];

const EXCLUDED_FILENAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Pipfile.lock",
    "Cargo.lock",
    "LICENSE",
    "CHANGELOG.md",
    "CONTRIBUTING.md",
];

const EXCLUDED_NAME_FRAGMENTS: &[&str] = &[".test.", ".spec.", ".env.", ".min.", ".bundle."];

/// Whether a repo-relative, forward-slash path is excluded regardless of
/// user patterns: hidden directories, build output, binaries, media, lock
/// files and tests.
pub fn is_excluded_by_default(relative_path: &str) -> bool {
    let segments: Vec<&str> = relative_path.split('/').collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return true;
    };

    if dirs.iter().any(|d| d.starts_with('.') && *d != ".") {
        return true;
    }

    let with_slash = format!("/{}", relative_path);
    if EXCLUDED_DIRECTORIES
        .iter()
        .any(|dir| with_slash.contains(&format!("/{}", dir)))
    {
        return true;
    }

    EXCLUDED_SUFFIXES.iter().any(|ext| relative_path.ends_with(ext))
        || EXCLUDED_FILENAMES.contains(file_name)
        || EXCLUDED_NAME_FRAGMENTS
            .iter()
            .any(|frag| file_name.contains(frag))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ForgeError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            ForgeError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ForgeError::Config(format!("Failed to build glob set: {}", e)))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Reads candidate files from a local checkout, honouring `.gitignore`.
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_patterns(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include = include;
        self.exclude = exclude;
        self
    }

    fn read_entry(&self, path: &Path) -> Option<FileDetails> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let relative = normalize_path(relative);

        match std::fs::read_to_string(path) {
            Ok(content) => Some(FileDetails::new(relative, content)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::debug!("Skipping non UTF-8 file: {}", relative);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", relative, e);
                None
            }
        }
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    async fn fetch_files(&self) -> Result<Vec<FileDetails>, ForgeError> {
        if !self.root.is_dir() {
            return Err(ForgeError::ValidationError {
                message: format!("Source path is not a directory: {}", self.root.display()),
                suggestion: "Pass the root of a local checkout".to_string(),
            });
        }

        let include_set = build_globset(&self.include)?;
        let exclude_set = build_globset(&self.exclude)?;

        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error walking directory: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false)
                || entry.path_is_symlink()
            {
                continue;
            }

            let relative = normalize_path(entry.path().strip_prefix(&self.root).unwrap_or(entry.path()));

            if is_excluded_by_default(&relative) {
                continue;
            }
            if !self.include.is_empty() && !include_set.is_match(&relative) {
                continue;
            }
            if exclude_set.is_match(&relative) {
                continue;
            }

            if let Some(file) = self.read_entry(entry.path()) {
                files.push(file);
            }
        }

        tracing::info!(root = %self.root.display(), files = files.len(), "Collected source files");
        Ok(files)
    }
}

/// Writes the draft as pretty JSON instead of opening a pull request.
#[derive(Debug, Clone)]
pub struct JsonDraftWriter {
    path: PathBuf,
}

impl JsonDraftWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PullRequestSink for JsonDraftWriter {
    async fn submit(&self, draft: &PullRequestDraft) -> Result<String, ForgeError> {
        let json = serde_json::to_string_pretty(draft)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_entry_layout() {
        let file = FileDetails::new("src/main.rs", "fn main() {}");
        assert_eq!(
            file.to_prompt_entry(),
            "<file>\n<file_path>src/main.rs</file_path>\n<file_contents>fn main() {}</file_contents>\n</file>"
        );
    }

    #[test]
    fn test_default_exclusions() {
        assert!(is_excluded_by_default("node_modules/react/index.js"));
        assert!(is_excluded_by_default("web/dist/app.js"));
        assert!(is_excluded_by_default(".github/workflows/ci.yml"));
        assert!(is_excluded_by_default("assets/logo.png"));
        assert!(is_excluded_by_default("src/app.test.ts"));
        assert!(is_excluded_by_default("package-lock.json"));
        assert!(!is_excluded_by_default("src/main.rs"));
        assert!(!is_excluded_by_default("README.md"));
        assert!(!is_excluded_by_default("src/distance.rs"));
    }

    #[test]
    fn test_draft_deserializes_camel_case() {
        let yaml = r#"
prTitle: "Add feature"
newFiles:
  - path: "src/new.rs"
    thoughts: "new module"
    content: |
      pub fn f() {}
deletedFiles:
  - "src/old.rs"
"#;
        let draft: PullRequestDraft = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(draft.pr_title, "Add feature");
        assert_eq!(draft.new_files.len(), 1);
        assert!(draft.modified_files.is_empty());
        assert_eq!(draft.deleted_files, vec!["src/old.rs".to_string()]);
        assert_eq!(draft.change_count(), 2);
    }

    #[tokio::test]
    async fn test_local_source_collects_relative_paths_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "b").unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 159, 146, 150]).unwrap();

        let files = LocalSource::new(dir.path()).fetch_files().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs"]);
    }

    #[tokio::test]
    async fn test_local_source_patterns() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "lib").unwrap();
        std::fs::write(dir.path().join("src/gen.rs"), "gen").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "notes").unwrap();

        let files = LocalSource::new(dir.path())
            .with_patterns(vec!["**/*.rs".to_string()], vec!["**/gen.rs".to_string()])
            .fetch_files()
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/lib.rs");
    }

    #[tokio::test]
    async fn test_local_source_rejects_missing_dir() {
        let err = LocalSource::new("/definitely/not/here")
            .fetch_files()
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_json_draft_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/draft.json");
        let draft = PullRequestDraft {
            pr_title: "Title".to_string(),
            ..Default::default()
        };
        let written = JsonDraftWriter::new(&path).submit(&draft).await.unwrap();
        assert!(written.ends_with("draft.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"prTitle\": \"Title\""));
    }
}
