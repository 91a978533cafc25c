// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Common fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use specforge::llm::client::{LLMClient, RetryConfig};
use specforge::llm::models::{ModelInfo, ModelTable, ProviderKind};
use specforge::llm::provider::{
    CompletionOptions, CompletionResponse, LLMProvider, Message, Pricing,
};
use specforge::llm::registry::{ProviderRegistry, ProviderSettings};
use specforge::llm::tokenizer::Tokenizer;
use specforge::llm::TokenAccountant;
use specforge::pipeline::events::{ProgressSink, TaskEvent};
use specforge::pipeline::files::FileDetails;
use specforge::pipeline::stage::StageExecutor;
use specforge::utils::error::ForgeError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const MODEL: &str = "scripted-model";

/// One token per whitespace-separated word.
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Replies from a script in call order; `None` fails that call.
/// Every user prompt it receives is kept for later inspection.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Option<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Option<&str>>) -> Arc<Self> {
        let mut replies: Vec<_> = replies.into_iter().map(|r| r.map(String::from)).collect();
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<CompletionResponse, ForgeError> {
        let user = messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(user);

        match self.replies.lock().unwrap().pop().flatten() {
            Some(content) => Ok(CompletionResponse {
                content,
                prompt_tokens: 1000,
                completion_tokens: 500,
            }),
            None => Err(ForgeError::Provider {
                provider: "scripted".to_string(),
                message: "scripted failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        MODEL
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: 0.01,
            output_per_1k: 0.02,
        }
    }
}

/// Keeps every published event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, TaskEvent)>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.kind())
            .collect()
    }

    pub fn events(&self) -> Vec<(String, TaskEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, task_id: &str, event: TaskEvent) {
        self.events
            .lock()
            .unwrap()
            .push((task_id.to_string(), event));
    }
}

/// An executor serving [`MODEL`] from `provider`, with no retries, no chunk
/// delay and a safety margin of zero.
pub fn executor(provider: Arc<ScriptedProvider>, max_input_tokens: usize) -> StageExecutor {
    let mut table = ModelTable::empty().with_safety_margin(0);
    table.insert(
        MODEL,
        ModelInfo::new(ProviderKind::OpenAI, max_input_tokens, 4096, Pricing::default()),
    );
    let registry = Arc::new(ProviderRegistry::new(table, ProviderSettings::default()));
    registry.register(
        MODEL,
        Arc::new(LLMClient::new(provider).with_retry_config(RetryConfig::none())),
    );
    StageExecutor::new(registry, TokenAccountant::new(Arc::new(WordTokenizer)))
        .with_chunk_delay(Duration::ZERO)
}

/// A file made of `words` words.
pub fn file_with_words(path: &str, words: usize) -> FileDetails {
    let content = vec!["word"; words].join(" ");
    FileDetails::new(path, content).with_token_count(words)
}

/// Creates a project tree under a fresh temporary directory.
pub fn create_mock_project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let root = dir.path().to_path_buf();

    for (path, content) in files {
        let file_path = root.join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    (dir, root)
}
