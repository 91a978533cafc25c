// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which chain of stages to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[value(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Specifications, implementation plan, then code.
    #[default]
    Code,
    /// Chunk-by-chunk codebase analysis, then an aggregated report.
    Analyze,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Code => "code",
            WorkflowKind::Analyze => "analyze",
        }
    }
}

/// CLI argument parsing with environment variable support.
///
/// Environment variables follow the pattern `SPECFORGE_*` and are overridden
/// by CLI flags. Example: `SPECFORGE_MODEL=gpt-4o` is overridden by
/// `--model claude-3-haiku-20240307`.
#[derive(Parser, Debug)]
#[command(name = "specforge")]
#[command(about = "Turn a task and a codebase into specifications, a plan and a code change")]
#[command(version)]
pub struct Args {
    /// Path to the repository
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Task description
    #[arg(short, long, env = "SPECFORGE_TASK")]
    pub task: Option<String>,

    /// Read the task description from a file
    #[arg(long, conflicts_with = "task")]
    pub task_file: Option<PathBuf>,

    /// Workflow to run
    #[arg(short, long, value_enum, default_value_t = WorkflowKind::Code, env = "SPECFORGE_WORKFLOW")]
    pub workflow: WorkflowKind,

    /// Model identifier, as listed in the model table
    #[arg(short, long, env = "SPECFORGE_MODEL")]
    pub model: Option<String>,

    /// Where to write the result (draft JSON or analysis text)
    #[arg(short, long, env = "SPECFORGE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Identifier of this run, used for events and run records
    #[arg(long, env = "SPECFORGE_TASK_ID")]
    pub task_id: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "specforge.toml", env = "SPECFORGE_CONFIG")]
    pub config: PathBuf,

    /// Include only matching files (repeatable)
    #[arg(long)]
    pub include: Vec<String>,

    /// Exclude matching files (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Drop files at least this many tokens long
    #[arg(long, env = "SPECFORGE_MAX_FILE_TOKENS")]
    pub max_file_tokens: Option<usize>,

    /// Pause after each chunk call, in milliseconds
    #[arg(long, env = "SPECFORGE_CHUNK_DELAY_MS")]
    pub chunk_delay_ms: Option<u64>,

    /// Record prompts and replies of every stage call
    #[arg(long, env = "SPECFORGE_RECORD_RUNS")]
    pub record_runs: bool,

    /// Show budget, admitted files and chunk plan without calling a model
    #[arg(long, env = "SPECFORGE_DRY_RUN")]
    pub dry_run: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short)]
    pub quiet: bool,
}

/// Which arguments were given explicitly on the command line or through
/// the environment, as opposed to clap defaults. Only those override
/// config files.
#[derive(Debug, Clone, Default)]
pub struct ArgPresence {
    pub workflow: bool,
    pub config: bool,
}

impl ArgPresence {
    fn from_matches(matches: &ArgMatches) -> Self {
        let explicit = |id: &str| {
            matches!(
                matches.value_source(id),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            )
        };
        Self {
            workflow: explicit("workflow"),
            config: explicit("config"),
        }
    }
}

pub fn parse() -> Result<(Args, ArgPresence), clap::Error> {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(itr: I) -> Result<(Args, ArgPresence), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Args::command().try_get_matches_from(itr)?;
    let args = Args::from_arg_matches(&matches)?;
    Ok((args, ArgPresence::from_matches(&matches)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let (args, presence) = parse_from(["specforge"]).unwrap();
        assert_eq!(args.path, PathBuf::from("."));
        assert_eq!(args.workflow, WorkflowKind::Code);
        assert_eq!(args.config, PathBuf::from("specforge.toml"));
        assert!(!presence.workflow);
        assert!(!presence.config);
    }

    #[test]
    fn test_explicit_flags_are_tracked() {
        let (args, presence) = parse_from([
            "specforge",
            "repo",
            "--task",
            "add login",
            "--workflow",
            "analyze",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.task.as_deref(), Some("add login"));
        assert_eq!(args.workflow, WorkflowKind::Analyze);
        assert_eq!(args.verbose, 2);
        assert!(presence.workflow);
    }

    #[test]
    fn test_task_and_task_file_conflict() {
        let err = parse_from(["specforge", "--task", "x", "--task-file", "t.md"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
