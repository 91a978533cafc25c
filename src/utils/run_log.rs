// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Run recorder: keeps the prompts and replies of every stage call.
//!
//! Records land in `<dir>/<task_id>/<stage>/<info>.<ext>`. In console mode
//! they are logged at debug level instead. Recording is best-effort: a
//! failure is logged and the run carries on.

use crate::utils::error::ForgeError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default directory for recorded runs, relative to the working directory.
pub const DEFAULT_RUN_LOG_DIR: &str = ".specforge/runs";

/// What a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunInfo {
    SystemPrompt,
    UserPrompt,
    Response,
    ParsedResponse,
}

impl RunInfo {
    fn base_name(self) -> &'static str {
        match self {
            Self::SystemPrompt => "system_prompt",
            Self::UserPrompt => "user_prompt",
            Self::Response => "ai_response",
            Self::ParsedResponse => "ai_response_parsed",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::ParsedResponse => "yaml",
            _ => "txt",
        }
    }

    /// File name, with a 1-based chunk suffix for chunked calls.
    pub fn file_name(self, chunk: Option<usize>) -> String {
        match chunk {
            Some(index) => format!("{}_chunk_{}.{}", self.base_name(), index + 1, self.extension()),
            None => format!("{}.{}", self.base_name(), self.extension()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunLogMode {
    #[default]
    Off,
    Console,
    Files(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct RunRecorder {
    mode: RunLogMode,
}

impl RunRecorder {
    pub fn new(mode: RunLogMode) -> Self {
        Self { mode }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &RunLogMode {
        &self.mode
    }

    pub fn record(
        &self,
        task_id: &str,
        stage: &str,
        info: RunInfo,
        chunk: Option<usize>,
        content: &str,
    ) {
        match &self.mode {
            RunLogMode::Off => {}
            RunLogMode::Console => {
                tracing::debug!(
                    task_id,
                    stage,
                    record = %info.file_name(chunk),
                    "\n{}",
                    content
                );
            }
            RunLogMode::Files(dir) => {
                if let Err(e) = write_record(dir, task_id, stage, &info.file_name(chunk), content) {
                    tracing::warn!(task_id, stage, "Failed to record run info: {}", e);
                }
            }
        }
    }

    /// Record a decoded value as YAML.
    pub fn record_value<T: Serialize>(
        &self,
        task_id: &str,
        stage: &str,
        chunk: Option<usize>,
        value: &T,
    ) {
        if self.mode == RunLogMode::Off {
            return;
        }
        match serde_yaml::to_string(value) {
            Ok(yaml) => self.record(task_id, stage, RunInfo::ParsedResponse, chunk, &yaml),
            Err(e) => tracing::warn!(task_id, stage, "Failed to serialize parsed response: {}", e),
        }
    }
}

fn write_record(
    dir: &Path,
    task_id: &str,
    stage: &str,
    file_name: &str,
    content: &str,
) -> Result<PathBuf, ForgeError> {
    let stage_dir = dir.join(sanitize(task_id)).join(sanitize(stage));
    if !stage_dir.exists() {
        std::fs::create_dir_all(&stage_dir)?;

        // Prompts may embed private source code.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stage_dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    let path = stage_dir.join(file_name);
    std::fs::write(&path, content)?;
    Ok(path)
}

/// Keep ids usable as single path components.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
