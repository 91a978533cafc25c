// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! # specforge
//!
//! specforge turns a task description and a codebase into model-written
//! artifacts by chaining LLM stages. Two workflows are built in:
//!
//! - **code**: specifications, then an implementation plan, then the code
//!   change, delivered as a [`PullRequestDraft`](pipeline::files::PullRequestDraft);
//! - **analyze**: every chunk of the codebase is analyzed on its own, then the
//!   analyses are aggregated into one report.
//!
//! ## Architecture
//!
//! - [`llm`] estimates tokens, enforces per-model budgets, splits files into
//!   chunks and talks to the providers.
//! - [`pipeline`] assembles prompts, decodes replies, runs stages and
//!   sequences them into workflows.
//! - [`cli`] and [`utils`] hold configuration, errors and display helpers.
//!
//! Configuration follows hierarchical precedence:
//! 1. User config (~/.config/specforge/config.toml)
//! 2. Git root (specforge.toml)
//! 3. Current directory (specforge.toml)
//! 4. Explicit --config path
//! 5. Environment variables (SPECFORGE_*)
//! 6. CLI flags (highest precedence)

pub mod cli;
pub mod llm;
pub mod pipeline;
pub mod utils;

use anyhow::{Context, Result};
use cli::args::WorkflowKind;
use cli::config::ProvidersConfig;
use llm::budget::TokenAccountant;
use llm::client::RetryConfig;
use llm::models::{ModelInfo, ModelTable, ProviderKind};
use llm::registry::{ProviderRegistry, ProviderSettings};
use llm::tokenizer::TiktokenTokenizer;
use pipeline::files::{FileDetails, JsonDraftWriter, LocalSource, PullRequestSink, SourceProvider};
use pipeline::stage::{Stage, StageExecutor, StageRequest};
use pipeline::stages::{ChunkAnalysisStage, SpecificationsStage};
use pipeline::workflow::{Workflow, WorkflowReport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use utils::formatting::{format_cost, format_duration, format_number};
use utils::progress::TerminalProgress;
use utils::run_log::{RunLogMode, RunRecorder};

/// Final resolved configuration after merging all sources (CLI, env, config files).
#[derive(Debug, Clone)]
pub struct MergedConfig {
    /// Repository path to read files from
    pub path: PathBuf,
    pub task: Option<String>,
    pub task_file: Option<PathBuf>,
    pub task_id: String,
    pub workflow: WorkflowKind,
    pub model: String,
    pub output: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_tokens: usize,
    pub safety_margin: usize,
    pub chunk_delay: Duration,
    pub run_log: RunLogMode,
    pub retry: RetryConfig,
    pub providers: ProvidersConfig,
    /// Model table entries from configuration; override built-ins by id.
    pub models: HashMap<String, ModelInfo>,
    pub dry_run: bool,
    /// Verbosity level (0-3)
    pub verbose: u8,
    pub quiet: bool,
}

impl MergedConfig {
    /// The built-in model table with configured entries applied.
    pub fn model_table(&self) -> ModelTable {
        let mut table = ModelTable::builtin().with_safety_margin(self.safety_margin);
        for (model, info) in &self.models {
            table.insert(model.clone(), info.clone());
        }
        table
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        let max_output_tokens = [
            (
                ProviderKind::Anthropic,
                self.providers.anthropic.as_ref().and_then(|p| p.max_tokens),
            ),
            (
                ProviderKind::OpenAI,
                self.providers.openai.as_ref().and_then(|p| p.max_tokens),
            ),
            (
                ProviderKind::Ollama,
                self.providers.ollama.as_ref().and_then(|p| p.max_tokens),
            ),
        ]
        .into_iter()
        .filter_map(|(kind, cap)| cap.map(|cap| (kind, cap)))
        .collect();

        ProviderSettings {
            anthropic_api_url: self.providers.anthropic.as_ref().and_then(|p| p.base_url.clone()),
            openai_base_url: self.providers.openai.as_ref().and_then(|p| p.base_url.clone()),
            ollama_host: self.providers.ollama.as_ref().and_then(|p| p.host.clone()),
            max_output_tokens,
            temperature: None,
            retry: self.retry.clone(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-q` selects warn and `-v` counts
/// select info, debug and trace for this crate.
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("specforge={},warn", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(config: MergedConfig) -> Result<()> {
    tracing::info!("specforge v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!(
        workflow = config.workflow.as_str(),
        model = %config.model,
        task_id = %config.task_id,
        max_file_tokens = config.max_file_tokens,
        chunk_delay_ms = config.chunk_delay.as_millis() as u64,
        "Configuration resolved"
    );

    if !config.path.exists() {
        return Err(anyhow::anyhow!(
            "Repository path does not exist: {}",
            config.path.display()
        ))
        .context("Failed to validate repository path");
    }

    let task = resolve_task(&config).await?;
    let table = config.model_table();
    table
        .get(&config.model)
        .context("Model is not in the model table")?;

    let tokenizer =
        TiktokenTokenizer::from_model_name(&config.model).context("Failed to load tokenizer")?;
    let accountant = TokenAccountant::new(Arc::new(tokenizer));

    let files = LocalSource::new(&config.path)
        .with_patterns(config.include.clone(), config.exclude.clone())
        .fetch_files()
        .await
        .context("Failed to collect source files")?;
    let files = accountant.tokenize_files(files, config.max_file_tokens);

    if config.dry_run {
        display_dry_run(&config, &table, &accountant, &task, &files)?;
        return Ok(());
    }

    let progress = Arc::new(TerminalProgress::new(config.quiet));
    let registry = ProviderRegistry::new(table, config.provider_settings());
    let executor = StageExecutor::new(Arc::new(registry), accountant)
        .with_chunk_delay(config.chunk_delay)
        .with_recorder(RunRecorder::new(config.run_log.clone()))
        .with_progress(Arc::clone(&progress) as Arc<dyn pipeline::events::ProgressSink>);

    let workflow = match config.workflow {
        WorkflowKind::Code => Workflow::code_generation(executor),
        WorkflowKind::Analyze => Workflow::codebase_analysis(executor),
    };

    let request = StageRequest::new(&config.task_id, &config.model, task, files);
    let report = workflow.run(request).await;
    progress.finish();
    let report = report.context("Workflow failed")?;

    deliver(&config, &report).await?;
    if !config.quiet {
        display_summary(&report);
    }
    Ok(())
}

async fn resolve_task(config: &MergedConfig) -> Result<String> {
    if let Some(task) = &config.task {
        return Ok(task.clone());
    }
    if let Some(path) = &config.task_file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read task file {}", path.display()));
    }
    match config.workflow {
        WorkflowKind::Code => Err(anyhow::anyhow!(
            "The code workflow needs a task: pass --task or --task-file"
        )),
        WorkflowKind::Analyze => Ok("Describe the codebase.".to_string()),
    }
}

/// Write or print the result of the run.
async fn deliver(config: &MergedConfig, report: &WorkflowReport) -> Result<()> {
    match config.workflow {
        WorkflowKind::Code => match report.pull_request_draft() {
            Some(draft) => {
                if draft.is_empty() {
                    tracing::warn!("The coding stage proposed no file changes");
                }
                match &config.output {
                    Some(path) => {
                        let location = JsonDraftWriter::new(path)
                            .submit(&draft)
                            .await
                            .context("Failed to write the pull request draft")?;
                        tracing::info!(path = %location, changes = draft.change_count(), "Draft written");
                    }
                    None => {
                        let json = serde_json::to_string_pretty(&draft)
                            .context("Failed to serialize the pull request draft")?;
                        #[allow(clippy::print_stdout)]
                        {
                            println!("{}", json);
                        }
                    }
                }
            }
            None => {
                tracing::warn!("Could not decode the coding reply; showing it verbatim");
                write_text(config, report).await?;
            }
        },
        WorkflowKind::Analyze => write_text(config, report).await?,
    }
    Ok(())
}

async fn write_text(config: &MergedConfig, report: &WorkflowReport) -> Result<()> {
    let text = report
        .last()
        .map(|result| result.response_str.as_str())
        .unwrap_or_default();
    match &config.output {
        Some(path) => tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            #[allow(clippy::print_stdout)]
            {
                println!("{}", text);
            }
            Ok(())
        }
    }
}

fn display_summary(report: &WorkflowReport) {
    eprintln!();
    eprintln!("Run {} with {}", report.task_id, report.model);
    for outcome in &report.stages {
        let result = &outcome.result;
        eprintln!(
            "  {:<16} est. {:>8}  in {:>8}  out {:>8}  {}",
            outcome.stage,
            format_number(result.calculated_tokens),
            format_number(result.input_tokens),
            format_number(result.output_tokens),
            format_cost(result.cost)
        );
    }
    eprintln!(
        "Total: {} in {}",
        format_cost(report.total_cost()),
        format_duration(report.elapsed)
    );
}

/// Show what a run would send without calling a model.
fn display_dry_run(
    config: &MergedConfig,
    table: &ModelTable,
    accountant: &TokenAccountant,
    task: &str,
    files: &[FileDetails],
) -> Result<()> {
    let budget = table.budget(&config.model)?;
    let info = table.get(&config.model)?;
    let total_tokens: usize = files.iter().map(|f| accountant.file_tokens(f)).sum();

    eprintln!("Dry Run Mode - Configuration Summary");
    eprintln!("=====================================");
    eprintln!("Workflow:     {}", config.workflow.as_str());
    eprintln!("Model:        {} ({})", config.model, info.provider.as_str());
    eprintln!("Budget:       {} tokens", format_number(budget.get()));
    eprintln!("Path:         {}", config.path.display());
    eprintln!(
        "Files:        {} ({} tokens)",
        format_number(files.len()),
        format_number(total_tokens)
    );

    // The executor is only used for prompt interpolation here; no client is built.
    let registry = Arc::new(ProviderRegistry::new(table.clone(), ProviderSettings::default()));
    let executor = StageExecutor::new(registry, accountant.clone());
    let request = StageRequest::new(&config.task_id, &config.model, task, Vec::new());

    match config.workflow {
        WorkflowKind::Code => {
            let stage = SpecificationsStage;
            let fixed = format!("{}{}", stage.system_prompt(), executor.user_prompt(&stage, &request));
            let limit = accountant.apply_token_limit(budget, &fixed, files);
            eprintln!(
                "First stage:  {} files admitted, {} excluded, {} tokens",
                limit.allowed_files.len(),
                limit.excluded,
                format_number(limit.total_tokens)
            );
        }
        WorkflowKind::Analyze => {
            let stage = ChunkAnalysisStage;
            let fixed = format!("{}{}", stage.system_prompt(), executor.user_prompt(&stage, &request));
            let chunks = executor.planner().split_in_chunks(budget, &fixed, files);
            eprintln!("Chunks:       {}", chunks.len());
            for (index, chunk) in chunks.iter().enumerate() {
                let marker = if chunk.is_over_budget(budget) { " (over budget)" } else { "" };
                eprintln!(
                    "  #{:<3} {:>4} files {:>8} tokens{}",
                    index + 1,
                    chunk.files.len(),
                    format_number(chunk.tokens),
                    marker
                );
            }
        }
    }
    eprintln!();
    eprintln!("No LLM calls will be made.");
    Ok(())
}
