// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

pub mod decoder;
pub mod events;
pub mod files;
pub mod prompt;
pub mod stage;
pub mod stages;
pub mod workflow;

pub use decoder::{DecodeOptions, Decoded, ResponseDecoder, ResponseFormat, detect_format};
pub use events::{ConnectionRegistry, LogProgressSink, ProgressSink, TaskEvent, TaskUpdate};
pub use files::{FileChange, FileDetails, LocalSource, PullRequestDraft, PullRequestSink, SourceProvider};
pub use prompt::PromptBuilder;
pub use stage::{Stage, StageExecutor, StageRequest, StageResult};
pub use workflow::{Chunked, PipelineStage, SingleShot, Workflow, WorkflowReport};
