// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Prompt assembly: placeholder interpolation and file serialization.
//!
//! Templates contain bracketed markers such as `[[TASKDESCRIPTION]]`. A
//! parameter `taskDescription` fills the marker whose name is its key in upper
//! case. Files always go in last, through [`PromptBuilder::add_files_to_prompt`],
//! so that text inside a file can never be mistaken for a marker.

use crate::pipeline::files::FileDetails;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Where the serialized files go.
pub const CODEFILES_PLACEHOLDER: &str = "[[EXISTINGCODEFILES]]";
pub const TASK_PLACEHOLDER: &str = "[[TASKDESCRIPTION]]";
pub const SPECS_PLACEHOLDER: &str = "[[SPECIFICATIONS]]";
pub const PLAN_PLACEHOLDER: &str = "[[IMPLEMENTATIONPLAN]]";
pub const CHUNK_ANALYSES_PLACEHOLDER: &str = "[[CHUNKANALYSES]]";

/// Parameter key reserved for the task description.
pub const TASK_KEY: &str = "taskDescription";

const CODEFILES_MARKER: &str = "EXISTINGCODEFILES";
const FILE_SEPARATOR: &str = "\n\n";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([A-Z0-9_]+)\]\]").expect("placeholder pattern is invalid")
});

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Substitute every marker that has a matching parameter.
    ///
    /// Parameters without a marker are ignored; markers without a parameter
    /// stay in the output verbatim. The file marker is never touched here.
    /// Substitution is a single pass, so values are inserted literally even
    /// if they contain marker-like text.
    pub fn build_user_prompt(&self, template: &str, params: &BTreeMap<String, String>) -> String {
        let by_marker: HashMap<String, &str> = params
            .iter()
            .map(|(key, value)| (key.to_uppercase(), value.as_str()))
            .filter(|(marker, _)| marker != CODEFILES_MARKER)
            .collect();

        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let marker = caps.get(1).map_or("", |m| m.as_str());
                match by_marker.get(marker) {
                    Some(value) => (*value).to_string(),
                    None => caps.get(0).map_or("", |m| m.as_str()).to_string(),
                }
            })
            .into_owned()
    }

    /// Replace the file marker with `files`, in order.
    pub fn add_files_to_prompt(&self, prompt: &str, files: &[FileDetails]) -> String {
        if !prompt.contains(CODEFILES_PLACEHOLDER) {
            tracing::debug!("Prompt has no file placeholder; files not inserted");
        }
        prompt.replace(CODEFILES_PLACEHOLDER, &format_files(files))
    }

    /// Like [`add_files_to_prompt`](Self::add_files_to_prompt), with the
    /// block wrapped in a 1-based `<chunk index="N">` element.
    pub fn add_chunk_files_to_prompt(
        &self,
        prompt: &str,
        chunk_index: usize,
        files: &[FileDetails],
    ) -> String {
        let block = format!(
            "<chunk index=\"{}\">\n{}\n</chunk>",
            chunk_index + 1,
            format_files(files)
        );
        prompt.replace(CODEFILES_PLACEHOLDER, &block)
    }
}

/// Serialize files in the layout used inside prompts.
pub fn format_files(files: &[FileDetails]) -> String {
    files
        .iter()
        .map(FileDetails::to_prompt_entry)
        .collect::<Vec<_>>()
        .join(FILE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_by_upper_case_key() {
        let prompt = PromptBuilder::new().build_user_prompt(
            "Task: [[TASKDESCRIPTION]]\nSpecs: [[SPECIFICATIONS]]",
            &params(&[(TASK_KEY, "add login"), ("specifications", "- use oauth")]),
        );
        assert_eq!(prompt, "Task: add login\nSpecs: - use oauth");
    }

    #[test]
    fn test_unknown_marker_left_verbatim_and_extra_params_ignored() {
        let prompt = PromptBuilder::new().build_user_prompt(
            "[[TASKDESCRIPTION]] / [[IMPLEMENTATIONPLAN]]",
            &params(&[(TASK_KEY, "t"), ("unused", "x")]),
        );
        assert_eq!(prompt, "t / [[IMPLEMENTATIONPLAN]]");
    }

    #[test]
    fn test_file_marker_survives_interpolation() {
        let prompt = PromptBuilder::new().build_user_prompt(
            "[[EXISTINGCODEFILES]]\n[[TASKDESCRIPTION]]",
            &params(&[(TASK_KEY, "t"), ("existingCodeFiles", "oops")]),
        );
        assert_eq!(prompt, "[[EXISTINGCODEFILES]]\nt");
    }

    #[test]
    fn test_values_are_not_reinterpolated() {
        let prompt = PromptBuilder::new().build_user_prompt(
            "[[TASKDESCRIPTION]] and [[SPECIFICATIONS]]",
            &params(&[(TASK_KEY, "see [[SPECIFICATIONS]]"), ("specifications", "S")]),
        );
        assert_eq!(prompt, "see [[SPECIFICATIONS]] and S");
    }

    #[test]
    fn test_every_occurrence_is_replaced() {
        let prompt = PromptBuilder::new()
            .build_user_prompt("[[TASKDESCRIPTION]]|[[TASKDESCRIPTION]]", &params(&[(TASK_KEY, "x")]));
        assert_eq!(prompt, "x|x");
    }

    #[test]
    fn test_add_files_in_order() {
        let files = vec![FileDetails::new("a.rs", "A"), FileDetails::new("b.rs", "B")];
        let prompt = PromptBuilder::new().add_files_to_prompt("Files:\n[[EXISTINGCODEFILES]]\nEnd", &files);
        assert_eq!(
            prompt,
            "Files:\n<file>\n<file_path>a.rs</file_path>\n<file_contents>A</file_contents>\n</file>\n\n\
             <file>\n<file_path>b.rs</file_path>\n<file_contents>B</file_contents>\n</file>\nEnd"
        );
    }

    #[test]
    fn test_add_files_without_files_clears_marker() {
        let prompt = PromptBuilder::new().add_files_to_prompt("x [[EXISTINGCODEFILES]] y", &[]);
        assert_eq!(prompt, "x  y");
    }

    #[test]
    fn test_chunk_files_carry_one_based_index() {
        let files = vec![FileDetails::new("a.rs", "A")];
        let prompt = PromptBuilder::new().add_chunk_files_to_prompt("[[EXISTINGCODEFILES]]", 2, &files);
        assert!(prompt.starts_with("<chunk index=\"3\">\n<file>"));
        assert!(prompt.ends_with("</file>\n</chunk>"));
    }
}
