// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! One pipeline step: prompt in, typed result out.
//!
//! A [`Stage`] only describes its prompts and output type. The
//! [`StageExecutor`] runs it, either single-shot (files beyond the budget are
//! left out) or chunked (files are split into budget-sized chunks processed
//! one after another).
//!
//! Failure policy:
//! - a provider failure or an empty reply fails a single-shot call;
//! - in chunked mode the same failure only skips that chunk;
//! - a reply that cannot be decoded is never an error. The result carries
//!   `response: None` and the raw text in `response_str`.

use crate::llm::budget::TokenAccountant;
use crate::llm::chunker::ChunkPlanner;
use crate::llm::client::Generation;
use crate::llm::models::TokenBudget;
use crate::llm::registry::ProviderRegistry;
use crate::pipeline::decoder::{DecodeOptions, ResponseDecoder};
use crate::pipeline::events::{NullProgressSink, ProgressSink, TaskEvent};
use crate::pipeline::files::FileDetails;
use crate::pipeline::prompt::{CODEFILES_PLACEHOLDER, PromptBuilder, TASK_KEY};
use crate::utils::error::ForgeError;
use crate::utils::run_log::{RunInfo, RunRecorder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Pause after every chunk call, to stay under provider rate limits.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_secs(30);

pub trait Stage: Send + Sync {
    type Output: DeserializeOwned + Serialize + Send + Sync + 'static;

    /// Identifier used in logs, events and run records.
    fn name(&self) -> &'static str;

    /// Parameter key under which the next stage receives this stage's raw
    /// reply.
    fn output_key(&self) -> &'static str;

    fn system_prompt(&self) -> &str;

    /// User prompt skeleton with `[[MARKER]]` placeholders.
    fn prompt_template(&self) -> &str;

    /// Whether the prompt carries the code files. Stages without a file slot
    /// are neither given files nor charged for them.
    fn uses_files(&self) -> bool {
        self.prompt_template().contains(CODEFILES_PLACEHOLDER)
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default()
    }

    /// Turn the raw reply into the stage output.
    fn decode(&self, decoder: &ResponseDecoder, raw: &str) -> Result<Self::Output, ForgeError> {
        decoder.parse_as(raw, &self.decode_options())
    }
}

/// Input of one stage call.
#[derive(Debug, Clone, Default)]
pub struct StageRequest {
    pub task_id: String,
    pub model: String,
    /// Task description, inserted under the reserved `taskDescription` key.
    pub task: String,
    pub files: Vec<FileDetails>,
    pub params: BTreeMap<String, String>,
}

impl StageRequest {
    pub fn new(
        task_id: impl Into<String>,
        model: impl Into<String>,
        task: impl Into<String>,
        files: Vec<FileDetails>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            model: model.into(),
            task: task.into(),
            files,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Params with the task description merged in.
    fn prompt_params(&self) -> BTreeMap<String, String> {
        let mut params = self.params.clone();
        params.insert(TASK_KEY.to_string(), self.task.clone());
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult<T> {
    /// Decoded reply; `None` when decoding failed.
    pub response: Option<T>,
    /// Raw reply text, always present.
    pub response_str: String,
    /// Provider-reported prompt tokens.
    pub input_tokens: usize,
    /// Provider-reported completion tokens.
    pub output_tokens: usize,
    pub cost: f64,
    /// Pre-call estimate of the prompt size. Diagnostic only; cost is
    /// computed from the provider-reported counts.
    pub calculated_tokens: usize,
}

impl<T> StageResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> Option<U>) -> StageResult<U> {
        StageResult {
            response: self.response.and_then(f),
            response_str: self.response_str,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost: self.cost,
            calculated_tokens: self.calculated_tokens,
        }
    }
}

/// Runs stages against the providers in a [`ProviderRegistry`].
pub struct StageExecutor {
    registry: Arc<ProviderRegistry>,
    accountant: TokenAccountant,
    planner: ChunkPlanner,
    prompts: PromptBuilder,
    decoder: ResponseDecoder,
    chunk_delay: Duration,
    recorder: RunRecorder,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("chunk_delay", &self.chunk_delay)
            .field("recorder", &self.recorder)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    pub fn new(registry: Arc<ProviderRegistry>, accountant: TokenAccountant) -> Self {
        Self {
            registry,
            planner: ChunkPlanner::new(accountant.clone()),
            accountant,
            prompts: PromptBuilder::new(),
            decoder: ResponseDecoder::new(),
            chunk_delay: DEFAULT_CHUNK_DELAY,
            recorder: RunRecorder::disabled(),
            sink: Arc::new(NullProgressSink),
        }
    }

    /// Pause between chunk calls; zero disables it.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_recorder(mut self, recorder: RunRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    pub fn planner(&self) -> &ChunkPlanner {
        &self.planner
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.sink
    }

    pub fn chunk_delay(&self) -> Duration {
        self.chunk_delay
    }

    /// Budget for `model` under the registry's model table.
    pub fn budget(&self, model: &str) -> Result<TokenBudget, ForgeError> {
        self.registry.models().budget(model)
    }

    /// The interpolated user prompt, before files are inserted.
    pub fn user_prompt<S: Stage>(&self, stage: &S, request: &StageRequest) -> String {
        self.prompts
            .build_user_prompt(stage.prompt_template(), &request.prompt_params())
    }

    /// Run `stage` once with as many files as the budget admits.
    ///
    /// # Errors
    ///
    /// `UnknownModel` for a model without a budget, any error the provider
    /// client gives up on, and `EmptyResponse` for a blank reply.
    pub async fn process<S: Stage>(
        &self,
        stage: &S,
        request: &StageRequest,
    ) -> Result<StageResult<S::Output>, ForgeError> {
        let name = stage.name();
        let budget = self.budget(&request.model)?;
        let system_prompt = stage.system_prompt();
        let user_prompt = self.user_prompt(stage, request);

        let candidates: &[FileDetails] = if stage.uses_files() {
            &request.files
        } else {
            &[]
        };

        let fixed_prompt = format!("{}{}", system_prompt, user_prompt);
        let limit = self
            .accountant
            .apply_token_limit(budget, &fixed_prompt, candidates);
        let final_prompt = self
            .prompts
            .add_files_to_prompt(&user_prompt, &limit.allowed_files);

        tracing::info!(
            task_id = %request.task_id,
            stage = name,
            model = %request.model,
            files = limit.allowed_files.len(),
            tokens = limit.total_tokens,
            "Running stage"
        );

        self.recorder
            .record(&request.task_id, name, RunInfo::SystemPrompt, None, system_prompt);
        self.recorder
            .record(&request.task_id, name, RunInfo::UserPrompt, None, &final_prompt);

        let generation = self
            .generate(name, &request.model, system_prompt, &final_prompt)
            .await?;
        self.recorder
            .record(&request.task_id, name, RunInfo::Response, None, &generation.content);

        Ok(self.finish(stage, request, None, generation, limit.total_tokens))
    }

    /// Run `stage` over every file, one budget-sized chunk at a time.
    ///
    /// Chunks run in file order, one after another, with the configured
    /// delay after each. A chunk whose call fails is logged and skipped, so
    /// the result may hold fewer entries than there were chunks.
    ///
    /// # Errors
    ///
    /// Only before the first chunk: `UnknownModel` for a model without a
    /// budget, or a provider that cannot be built.
    pub async fn process_in_chunks<S: Stage>(
        &self,
        stage: &S,
        request: &StageRequest,
    ) -> Result<Vec<StageResult<S::Output>>, ForgeError> {
        let name = stage.name();
        let budget = self.budget(&request.model)?;
        let client = self.registry.get(&request.model)?;
        let system_prompt = stage.system_prompt();
        let user_prompt = self.user_prompt(stage, request);

        let fixed_prompt = format!("{}{}", system_prompt, user_prompt);
        let chunks = self
            .planner
            .split_in_chunks(budget, &fixed_prompt, &request.files);
        let total = chunks.len();

        tracing::info!(
            task_id = %request.task_id,
            stage = name,
            model = %request.model,
            files = request.files.len(),
            chunks = total,
            "Running chunked stage"
        );
        self.recorder
            .record(&request.task_id, name, RunInfo::SystemPrompt, None, system_prompt);

        let mut results = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_prompt =
                self.prompts
                    .add_chunk_files_to_prompt(&user_prompt, index, &chunk.files);
            self.recorder.record(
                &request.task_id,
                name,
                RunInfo::UserPrompt,
                Some(index),
                &chunk_prompt,
            );

            tracing::debug!(
                stage = name,
                chunk = index + 1,
                total,
                files = chunk.files.len(),
                tokens = chunk.tokens,
                "Processing chunk"
            );

            let outcome = match client.generate_response(system_prompt, &chunk_prompt).await {
                Ok(generation) if generation.content.trim().is_empty() => {
                    Err(ForgeError::EmptyResponse {
                        stage: name.to_string(),
                    })
                }
                other => other,
            };

            let succeeded = match outcome {
                Ok(generation) => {
                    self.recorder.record(
                        &request.task_id,
                        name,
                        RunInfo::Response,
                        Some(index),
                        &generation.content,
                    );
                    results.push(self.finish(stage, request, Some(index), generation, chunk.tokens));
                    true
                }
                Err(err) => {
                    tracing::warn!(
                        stage = name,
                        chunk = index + 1,
                        total,
                        "Chunk failed, continuing with the next one: {}",
                        err
                    );
                    false
                }
            };

            self.sink.publish(
                &request.task_id,
                TaskEvent::Chunk {
                    stage: name.to_string(),
                    index: index + 1,
                    total,
                    estimated_tokens: chunk.tokens,
                    succeeded,
                },
            );

            if !self.chunk_delay.is_zero() {
                tracing::debug!(delay_ms = self.chunk_delay.as_millis() as u64, "Waiting before next call");
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        tracing::info!(
            stage = name,
            succeeded = results.len(),
            total,
            "Chunked stage finished"
        );
        Ok(results)
    }

    async fn generate(
        &self,
        stage: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Generation, ForgeError> {
        let client = self.registry.get(model)?;
        let generation = client.generate_response(system_prompt, user_prompt).await?;
        if generation.content.trim().is_empty() {
            return Err(ForgeError::EmptyResponse {
                stage: stage.to_string(),
            });
        }
        Ok(generation)
    }

    fn finish<S: Stage>(
        &self,
        stage: &S,
        request: &StageRequest,
        chunk: Option<usize>,
        generation: Generation,
        calculated_tokens: usize,
    ) -> StageResult<S::Output> {
        let response = match stage.decode(&self.decoder, &generation.content) {
            Ok(value) => {
                self.recorder
                    .record_value(&request.task_id, stage.name(), chunk, &value);
                Some(value)
            }
            Err(err) => {
                tracing::warn!(
                    stage = stage.name(),
                    chunk = chunk.map(|i| i + 1),
                    "Could not decode the reply, keeping raw text: {}",
                    err
                );
                None
            }
        };

        tracing::debug!(
            stage = stage.name(),
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            calculated_tokens,
            cost = generation.cost,
            "Stage call finished"
        );

        StageResult {
            response,
            response_str: generation.content,
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
            cost: generation.cost,
            calculated_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{LLMClient, RetryConfig};
    use crate::llm::models::{ModelInfo, ModelTable, ProviderKind};
    use crate::llm::provider::{
        CompletionOptions, CompletionResponse, LLMProvider, Message, Pricing,
    };
    use crate::llm::registry::ProviderSettings;
    use crate::llm::tokenizer::Tokenizer;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;

    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    /// Replies from a script, one entry per call; `None` fails the call.
    struct Scripted {
        replies: Mutex<Vec<Option<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<&str>>) -> Self {
            let mut replies: Vec<_> = replies.into_iter().map(|r| r.map(String::from)).collect();
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn complete(
            &self,
            messages: &[Message],
            _options: &CompletionOptions,
        ) -> Result<CompletionResponse, ForgeError> {
            self.prompts.lock().unwrap().push(messages[1].content.clone());
            match self.replies.lock().unwrap().pop().flatten() {
                Some(content) => Ok(CompletionResponse {
                    content,
                    prompt_tokens: 40,
                    completion_tokens: 10,
                }),
                None => Err(ForgeError::Provider {
                    provider: "scripted".to_string(),
                    message: "boom".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        fn pricing(&self) -> Pricing {
            Pricing {
                input_per_1k: 1.0,
                output_per_1k: 2.0,
            }
        }
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Echo {
        items: Vec<String>,
    }

    struct EchoStage;

    impl Stage for EchoStage {
        type Output = Echo;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn output_key(&self) -> &'static str {
            "echo"
        }

        fn system_prompt(&self) -> &str {
            "sys"
        }

        fn prompt_template(&self) -> &str {
            "Do [[TASKDESCRIPTION]] with [[EXTRA]]\n[[EXISTINGCODEFILES]]"
        }
    }

    /// Works only from earlier replies; has no file slot.
    struct SummaryStage;

    impl Stage for SummaryStage {
        type Output = Echo;

        fn name(&self) -> &'static str {
            "summary"
        }

        fn output_key(&self) -> &'static str {
            "summary"
        }

        fn system_prompt(&self) -> &str {
            "sys"
        }

        fn prompt_template(&self) -> &str {
            "Summarize [[EXTRA]]"
        }
    }

    fn executor(provider: Arc<Scripted>, max_input: usize) -> StageExecutor {
        let mut table = ModelTable::empty().with_safety_margin(0);
        table.insert(
            "test-model",
            ModelInfo::new(ProviderKind::OpenAI, max_input, 100, Pricing::default()),
        );
        let registry = Arc::new(ProviderRegistry::new(table, ProviderSettings::default()));
        registry.register(
            "test-model",
            Arc::new(LLMClient::new(provider).with_retry_config(RetryConfig::none())),
        );
        StageExecutor::new(registry, TokenAccountant::new(Arc::new(WordTokenizer)))
            .with_chunk_delay(Duration::ZERO)
    }

    fn files() -> Vec<FileDetails> {
        vec![
            FileDetails::new("a.rs", "a").with_token_count(100),
            FileDetails::new("b.rs", "b").with_token_count(100),
            FileDetails::new("c.rs", "c").with_token_count(100),
        ]
    }

    fn request() -> StageRequest {
        StageRequest::new("t-1", "test-model", "the task", files()).with_param("extra", "care")
    }

    #[tokio::test]
    async fn test_process_decodes_and_reports_estimate() {
        let provider = Arc::new(Scripted::new(vec![Some("```yaml\nitems:\n  - x\n```")]));
        // The fixed prompt "sysDo the task with care\n[[EXISTINGCODEFILES]]" is 6 words.
        let executor = executor(provider.clone(), 250);

        let result = executor.process(&EchoStage, &request()).await.unwrap();

        assert_eq!(result.response, Some(Echo { items: vec!["x".to_string()] }));
        assert_eq!(result.calculated_tokens, 206);
        assert_eq!(result.input_tokens, 40);
        assert_eq!(result.output_tokens, 10);
        assert!((result.cost - 0.06).abs() < 1e-9);

        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Do the task with care\n"));
        assert!(prompt.contains("<file_path>b.rs</file_path>"));
        assert!(!prompt.contains("c.rs"));
    }

    #[tokio::test]
    async fn test_process_without_file_slot_counts_only_the_prompt() {
        let provider = Arc::new(Scripted::new(vec![Some("```yaml\nitems: []\n```")]));
        let executor = executor(provider.clone(), 10_000);

        assert!(EchoStage.uses_files());
        assert!(!SummaryStage.uses_files());

        let result = executor.process(&SummaryStage, &request()).await.unwrap();

        // "sysSummarize care" is 2 words; the 300 file tokens are not charged.
        assert_eq!(result.calculated_tokens, 2);
        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert_eq!(prompt, "Summarize care");
    }

    #[tokio::test]
    async fn test_process_keeps_raw_text_when_decoding_fails() {
        let provider = Arc::new(Scripted::new(vec![Some("```yaml\n: [broken\n```")]));
        let executor = executor(provider, 10_000);

        let result = executor.process(&EchoStage, &request()).await.unwrap();
        assert!(result.response.is_none());
        assert_eq!(result.response_str, "```yaml\n: [broken\n```");
    }

    #[tokio::test]
    async fn test_process_fails_on_provider_error_and_empty_reply() {
        let failing = executor(Arc::new(Scripted::new(vec![None])), 10_000);
        let err = failing.process(&EchoStage, &request()).await.unwrap_err();
        assert!(matches!(err, ForgeError::Provider { .. }));

        let blank = executor(Arc::new(Scripted::new(vec![Some("   ")])), 10_000);
        let err = blank.process(&EchoStage, &request()).await.unwrap_err();
        assert!(matches!(err, ForgeError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_any_call() {
        let provider = Arc::new(Scripted::new(vec![]));
        let executor = executor(provider.clone(), 10_000);
        let mut req = request();
        req.model = "missing".to_string();

        let err = executor.process_in_chunks(&EchoStage, &req).await.unwrap_err();
        assert!(matches!(err, ForgeError::UnknownModel { .. }));
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_run_in_order_and_survive_a_failure() {
        let provider = Arc::new(Scripted::new(vec![
            None,
            Some("```yaml\nitems: [second]\n```"),
        ]));
        let executor = executor(provider.clone(), 250);

        let results = executor.process_in_chunks(&EchoStage, &request()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].response,
            Some(Echo { items: vec!["second".to_string()] })
        );
        assert_eq!(results[0].calculated_tokens, 106);

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("<chunk index=\"1\">"));
        assert!(prompts[0].contains("b.rs"));
        assert!(prompts[1].contains("<chunk index=\"2\">"));
        assert!(prompts[1].contains("c.rs"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_follows_every_chunk() {
        let provider = Arc::new(Scripted::new(vec![Some("a"), Some("b")]));
        let executor = executor(provider, 250).with_chunk_delay(Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        let results = executor.process_in_chunks(&EchoStage, &request()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_no_files_means_no_chunks() {
        let provider = Arc::new(Scripted::new(vec![]));
        let executor = executor(provider, 250);
        let mut req = request();
        req.files.clear();

        let results = executor.process_in_chunks(&EchoStage, &req).await.unwrap();
        assert!(results.is_empty());
    }
}
