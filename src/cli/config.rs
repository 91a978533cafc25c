// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management using the `config` crate for hierarchical discovery and merging.
//!
//! ## Configuration Sources (in precedence order, highest to lowest):
//! 1. **CLI flags** - Highest precedence (merged in [`merge_config`])
//! 2. **Environment variables** - `SPECFORGE_<SECTION>__<KEY>`, e.g.
//!    `SPECFORGE_CHUNKING__DELAY_MS=0`
//! 3. **Config files** - Lowest precedence
//!
//! ## Config File Discovery (in merge order, later overrides earlier):
//! 1. `~/.config/specforge/config.toml` (user config directory)
//! 2. `specforge.toml` in the git repository root
//! 3. `./specforge.toml` in the current directory
//! 4. Explicit `--config` path (if provided and exists)
//!
//! ## Usage:
//! ```no_run
//! use specforge::cli::{args, config};
//!
//! let (args, presence) = args::parse()?;
//! let loaded = config::load(&args)?;
//! let merged = config::merge_config(&args, loaded, &presence);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::MergedConfig;
use crate::cli::args::{ArgPresence, Args, WorkflowKind};
use crate::llm::budget::DEFAULT_MAX_FILE_TOKENS;
use crate::llm::client::RetryConfig;
use crate::llm::models::{DEFAULT_SAFETY_MARGIN, ModelInfo};
use crate::utils::run_log::{DEFAULT_RUN_LOG_DIR, RunLogMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "specforge.toml";

/// Model used when neither flags nor config name one.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";

/// Root configuration structure loaded from config files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub include: PatternConfig,
    #[serde(default)]
    pub exclude: PatternConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub run_log: RunLogConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Extra or overriding entries for the model table.
    #[serde(default)]
    pub models: HashMap<String, ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub workflow: Option<WorkflowKind>,
    #[serde(default = "default_max_file_tokens")]
    pub max_file_tokens: usize,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: None,
            workflow: None,
            max_file_tokens: default_max_file_tokens(),
            safety_margin: default_safety_margin(),
        }
    }
}

fn default_max_file_tokens() -> usize {
    DEFAULT_MAX_FILE_TOKENS
}

fn default_safety_margin() -> usize {
    DEFAULT_SAFETY_MARGIN
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Pause after each chunk call.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLogConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Log records instead of writing files.
    #[serde(default)]
    pub console: bool,
    pub dir: Option<PathBuf>,
}

impl RunLogConfig {
    pub fn mode(&self, forced: bool) -> RunLogMode {
        match (self.enabled || forced, self.console) {
            (false, _) => RunLogMode::Off,
            (true, true) => RunLogMode::Console,
            (true, false) => RunLogMode::Files(
                self.dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_LOG_DIR)),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    RetryConfig::default().max_retries
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::default().initial_delay_ms
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::default().max_delay_ms
}

impl From<&RetrySection> for RetryConfig {
    fn from(section: &RetrySection) -> Self {
        RetryConfig {
            max_retries: section.max_retries,
            initial_delay_ms: section.initial_delay_ms,
            max_delay_ms: section.max_delay_ms,
            ..RetryConfig::default()
        }
    }
}

/// LLM provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub ollama: Option<OllamaConfig>,
}

/// Configuration for a single hosted LLM provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub max_tokens: Option<usize>,
}

/// Ollama-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: Option<String>,
    pub max_tokens: Option<usize>,
}

fn discover_config_paths(explicit_path: &Path, explicit: bool) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(user_config) = get_user_config_path() {
        paths.push(user_config);
    }

    if let Some(git_root) = find_git_root() {
        let git_config = git_root.join(CONFIG_FILE_NAME);
        if git_config.exists() {
            paths.push(git_config);
        }
    }

    let current_dir_config = PathBuf::from(CONFIG_FILE_NAME);
    if current_dir_config.exists() && !paths.iter().any(|p| same_file(p, &current_dir_config)) {
        paths.push(current_dir_config);
    }

    if explicit && explicit_path.exists() {
        paths.push(explicit_path.to_path_buf());
    }

    paths
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn find_git_root() -> Option<PathBuf> {
    git2::Repository::discover(".")
        .ok()
        .and_then(|repo| repo.workdir().map(|p| p.to_path_buf()))
}

fn get_user_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|config_dir| config_dir.join("specforge").join("config.toml"))
        .filter(|path| path.exists())
}

/// Load configuration from discovered config files and environment variables.
pub fn load(args: &Args) -> Result<Config> {
    let explicit = args.config != Path::new(CONFIG_FILE_NAME);
    if explicit && !args.config.exists() {
        anyhow::bail!("Config file not found: {}", args.config.display());
    }
    load_from(&discover_config_paths(&args.config, explicit))
}

/// Build the configuration from `paths` (later wins) and the environment.
pub fn load_from(paths: &[PathBuf]) -> Result<Config> {
    let mut builder = config::Config::builder();

    for config_path in paths {
        tracing::debug!(path = %config_path.display(), "Loading config file");
        builder = builder.add_source(config::File::from(config_path.as_path()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SPECFORGE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build().context("Failed to build configuration")?;

    settings
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Resolve the final configuration. CLI values win over config values;
/// repeatable patterns from both sources are combined.
pub fn merge_config(args: &Args, config: Config, presence: &ArgPresence) -> MergedConfig {
    let workflow = if presence.workflow {
        args.workflow
    } else {
        config.general.workflow.unwrap_or(args.workflow)
    };

    let model = args
        .model
        .clone()
        .or(config.general.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let task_id = args
        .task_id
        .clone()
        .unwrap_or_else(|| format!("run-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S")));

    let mut include = config.include.patterns;
    include.extend(args.include.iter().cloned());
    let mut exclude = config.exclude.patterns;
    exclude.extend(args.exclude.iter().cloned());

    let chunk_delay = Duration::from_millis(args.chunk_delay_ms.unwrap_or(config.chunking.delay_ms));

    MergedConfig {
        path: args.path.clone(),
        task: args.task.clone(),
        task_file: args.task_file.clone(),
        task_id,
        workflow,
        model,
        output: args.output.clone(),
        include,
        exclude,
        max_file_tokens: args.max_file_tokens.unwrap_or(config.general.max_file_tokens),
        safety_margin: config.general.safety_margin,
        chunk_delay,
        run_log: config.run_log.mode(args.record_runs),
        retry: RetryConfig::from(&config.retry),
        providers: config.providers,
        models: config.models,
        dry_run: args.dry_run,
        verbose: args.verbose,
        quiet: args.quiet,
    }
}
