// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! The concrete stages and their output types.
//!
//! Code generation runs specifications, then planner, then coding. Each
//! stage's raw reply reaches the next one through its output key. Codebase
//! analysis runs the chunk analysis stage over every file and feeds the
//! joined analyses to the aggregator.

use crate::pipeline::decoder::{DecodeOptions, ResponseDecoder};
use crate::pipeline::files::PullRequestDraft;
use crate::pipeline::stage::Stage;
use crate::utils::error::ForgeError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

pub const SPECIFICATIONS_KEY: &str = "specifications";
pub const PLAN_KEY: &str = "implementationPlan";
pub const CODE_KEY: &str = "code";
pub const CHUNK_ANALYSES_KEY: &str = "chunkAnalyses";
pub const CODEBASE_ANALYSIS_KEY: &str = "codebaseAnalysis";

static CHUNK_ANALYSIS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<chunk_analysis>.*</chunk_analysis>")
        .expect("chunk analysis pattern is invalid")
});

static CODEBASE_ANALYSIS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<codebase_analysis>.*</codebase_analysis>")
        .expect("codebase analysis pattern is invalid")
});

/// Tags of the analysis formats that hold lists.
const ANALYSIS_LIST_TAGS: &[&str] = &[
    "component",
    "relation",
    "feature",
    "pattern",
    "point",
    "area",
    "insight",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub title: String,
    #[serde(default)]
    pub thoughts: String,
    pub specification: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specifications {
    pub specifications: Vec<Specification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFile {
    pub path: String,
    /// `new`, `modified` or `deleted`, as written by the model.
    pub status: String,
    #[serde(default)]
    pub todos: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    #[serde(default)]
    pub thoughts: String,
    #[serde(default)]
    pub files: Vec<PlanFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationPlan {
    pub implementation_plan: Vec<PlanStep>,
}

impl ImplementationPlan {
    /// Every distinct file path the plan touches, in first-seen order.
    pub fn touched_files(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for file in self.implementation_plan.iter().flat_map(|s| &s.files) {
            if !paths.contains(&file.path.as_str()) {
                paths.push(&file.path);
            }
        }
        paths
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpecificationsStage;

impl Stage for SpecificationsStage {
    type Output = Specifications;

    fn name(&self) -> &'static str {
        "specifications"
    }

    fn output_key(&self) -> &'static str {
        SPECIFICATIONS_KEY
    }

    fn system_prompt(&self) -> &str {
        include_str!("../../prompts/specifications_system.md")
    }

    fn prompt_template(&self) -> &str {
        include_str!("../../prompts/specifications.md")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerStage;

impl Stage for PlannerStage {
    type Output = ImplementationPlan;

    fn name(&self) -> &'static str {
        "planner"
    }

    fn output_key(&self) -> &'static str {
        PLAN_KEY
    }

    fn system_prompt(&self) -> &str {
        include_str!("../../prompts/planner_system.md")
    }

    fn prompt_template(&self) -> &str {
        include_str!("../../prompts/planner.md")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodingStage;

impl Stage for CodingStage {
    type Output = PullRequestDraft;

    fn name(&self) -> &'static str {
        "coding"
    }

    fn output_key(&self) -> &'static str {
        CODE_KEY
    }

    fn system_prompt(&self) -> &str {
        include_str!("../../prompts/coding_system.md")
    }

    fn prompt_template(&self) -> &str {
        include_str!("../../prompts/coding.md")
    }
}

/// Analyzes one chunk of the codebase. Meant to run chunked.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkAnalysisStage;

impl Stage for ChunkAnalysisStage {
    type Output = Value;

    fn name(&self) -> &'static str {
        "chunk_analysis"
    }

    fn output_key(&self) -> &'static str {
        CHUNK_ANALYSES_KEY
    }

    fn system_prompt(&self) -> &str {
        include_str!("../../prompts/chunk_analysis_system.md")
    }

    fn prompt_template(&self) -> &str {
        include_str!("../../prompts/chunk_analysis.md")
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default().with_array_tags(ANALYSIS_LIST_TAGS.iter().copied())
    }

    fn decode(&self, decoder: &ResponseDecoder, raw: &str) -> Result<Value, ForgeError> {
        let block = extract_block(&CHUNK_ANALYSIS_BLOCK, raw, "chunk_analysis")?;
        decoder.parse_as(block, &self.decode_options())
    }
}

/// Merges chunk analyses into one codebase analysis.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatorStage;

impl Stage for AggregatorStage {
    type Output = Value;

    fn name(&self) -> &'static str {
        "aggregator"
    }

    fn output_key(&self) -> &'static str {
        CODEBASE_ANALYSIS_KEY
    }

    fn system_prompt(&self) -> &str {
        include_str!("../../prompts/aggregator_system.md")
    }

    fn prompt_template(&self) -> &str {
        include_str!("../../prompts/aggregator.md")
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::default().with_array_tags(ANALYSIS_LIST_TAGS.iter().copied())
    }

    fn decode(&self, decoder: &ResponseDecoder, raw: &str) -> Result<Value, ForgeError> {
        let block = extract_block(&CODEBASE_ANALYSIS_BLOCK, raw, "codebase_analysis")?;
        decoder.parse_as(block, &self.decode_options())
    }
}

fn extract_block<'a>(pattern: &Regex, raw: &'a str, tag: &str) -> Result<&'a str, ForgeError> {
    pattern
        .find(raw)
        .map(|m| m.as_str())
        .ok_or_else(|| ForgeError::parse(format!("Reply has no <{}> block", tag), None))
}
