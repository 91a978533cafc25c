// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Token accounting: deciding which candidate files fit a model's budget.
//!
//! Admission is greedy and order-preserving. Files arrive ranked (most
//! relevant first) and the first file that does not fit closes the list; the
//! accountant never skips ahead to a smaller file further down. A file is
//! either admitted whole or not at all.

use crate::llm::models::TokenBudget;
use crate::llm::tokenizer::Tokenizer;
use crate::pipeline::files::FileDetails;
use std::sync::Arc;

/// Default cap on a single file's size before it is dropped from a run.
pub const DEFAULT_MAX_FILE_TOKENS: usize = 8_000;

/// Outcome of [`TokenAccountant::apply_token_limit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLimit {
    /// Fixed prompt cost plus the cost of every admitted file.
    pub total_tokens: usize,
    pub allowed_files: Vec<FileDetails>,
    /// Number of candidates left out.
    pub excluded: usize,
}

#[derive(Clone)]
pub struct TokenAccountant {
    tokenizer: Arc<dyn Tokenizer>,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant").finish_non_exhaustive()
    }
}

impl TokenAccountant {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    /// Cost of one file inside a prompt: its annotated count when present,
    /// otherwise the estimate of its serialized prompt entry.
    pub fn file_tokens(&self, file: &FileDetails) -> usize {
        file.token_count
            .unwrap_or_else(|| self.estimate_tokens(&file.to_prompt_entry()))
    }

    /// Select the prefix of `files` that fits next to `fixed_prompt`.
    ///
    /// Never fails. When the fixed prompt alone exceeds the budget no file is
    /// admitted and `total_tokens` still reports the fixed cost.
    pub fn apply_token_limit(
        &self,
        budget: TokenBudget,
        fixed_prompt: &str,
        files: &[FileDetails],
    ) -> TokenLimit {
        let fixed_cost = self.estimate_tokens(fixed_prompt);
        let mut running = 0usize;
        let mut allowed_files = Vec::new();

        for file in files {
            let tokens = self.file_tokens(file);
            if !budget.admits(fixed_cost + running + tokens) {
                if allowed_files.is_empty() && budget.admits(fixed_cost) {
                    tracing::warn!(
                        path = %file.path,
                        tokens,
                        budget = budget.get(),
                        "File does not fit the budget on its own and was excluded"
                    );
                }
                break;
            }
            running += tokens;
            allowed_files.push(file.clone());
        }

        let excluded = files.len() - allowed_files.len();
        if excluded > 0 {
            tracing::info!(
                allowed = allowed_files.len(),
                excluded,
                budget = budget.get(),
                "Token budget applied"
            );
        }

        TokenLimit {
            total_tokens: fixed_cost + running,
            allowed_files,
            excluded,
        }
    }

    /// Annotate every file with a token count and drop files that are empty
    /// or at least `max_file_tokens` long.
    pub fn tokenize_files(
        &self,
        files: Vec<FileDetails>,
        max_file_tokens: usize,
    ) -> Vec<FileDetails> {
        let total = files.len();
        let kept: Vec<FileDetails> = files
            .into_iter()
            .filter_map(|file| {
                let tokens = self.file_tokens(&file);
                if tokens == 0 || tokens >= max_file_tokens {
                    tracing::debug!(path = %file.path, tokens, "Skipping file");
                    return None;
                }
                Some(file.with_token_count(tokens))
            })
            .collect();

        let skipped = total - kept.len();
        if skipped > 0 {
            tracing::info!(
                skipped,
                max_file_tokens,
                "Skipped files that were empty or too large"
            );
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn accountant() -> TokenAccountant {
        TokenAccountant::new(Arc::new(WordTokenizer))
    }

    fn sized(path: &str, tokens: usize) -> FileDetails {
        FileDetails::new(path, "x").with_token_count(tokens)
    }

    #[test]
    fn test_first_two_of_three_fit() {
        let files = vec![sized("a", 100), sized("b", 100), sized("c", 100)];
        let limit = accountant().apply_token_limit(TokenBudget(250), "", &files);

        assert_eq!(limit.allowed_files, files[..2].to_vec());
        assert_eq!(limit.total_tokens, 200);
        assert_eq!(limit.excluded, 1);
    }

    #[test]
    fn test_empty_files_reports_fixed_cost() {
        let limit = accountant().apply_token_limit(TokenBudget(250), "one two three", &[]);
        assert!(limit.allowed_files.is_empty());
        assert_eq!(limit.total_tokens, 3);
        assert_eq!(limit.excluded, 0);
    }

    #[test]
    fn test_does_not_skip_ahead_to_smaller_files() {
        let files = vec![sized("a", 100), sized("big", 500), sized("small", 10)];
        let limit = accountant().apply_token_limit(TokenBudget(250), "", &files);

        assert_eq!(limit.allowed_files.len(), 1);
        assert_eq!(limit.allowed_files[0].path, "a");
    }

    #[test]
    fn test_single_oversized_file_is_excluded_not_truncated() {
        let files = vec![sized("huge", 1_000)];
        let limit = accountant().apply_token_limit(TokenBudget(250), "fixed prompt", &files);

        assert!(limit.allowed_files.is_empty());
        assert_eq!(limit.total_tokens, 2);
    }

    #[test]
    fn test_fixed_prompt_over_budget_admits_nothing() {
        let prompt = "word ".repeat(300);
        let files = vec![sized("a", 1)];
        let limit = accountant().apply_token_limit(TokenBudget(250), &prompt, &files);

        assert!(limit.allowed_files.is_empty());
        assert_eq!(limit.total_tokens, 300);
    }

    #[test]
    fn test_budget_invariant_holds() {
        let files: Vec<_> = (0..40).map(|i| sized(&i.to_string(), (i * 7) % 60 + 1)).collect();
        for budget in [0, 10, 100, 333, 5_000] {
            let limit = accountant().apply_token_limit(TokenBudget(budget), "a b c", &files);
            if !limit.allowed_files.is_empty() {
                assert!(limit.total_tokens <= budget);
            }
            assert_eq!(
                limit.allowed_files,
                files[..limit.allowed_files.len()].to_vec()
            );
        }
    }

    #[test]
    fn test_exact_fit_is_admitted() {
        let files = vec![sized("a", 150), sized("b", 100)];
        let limit = accountant().apply_token_limit(TokenBudget(250), "", &files);
        assert_eq!(limit.allowed_files.len(), 2);
        assert_eq!(limit.total_tokens, 250);
    }

    #[test]
    fn test_file_tokens_falls_back_to_serialized_entry() {
        let file = FileDetails::new("src/lib.rs", "pub mod a;");
        let acct = accountant();
        assert_eq!(
            acct.file_tokens(&file),
            WordTokenizer.count_tokens(&file.to_prompt_entry())
        );
        assert_eq!(acct.file_tokens(&file.clone().with_token_count(42)), 42);
    }

    #[test]
    fn test_tokenize_files_annotates_and_filters() {
        let files = vec![
            FileDetails::new("small.rs", "fn a() {}"),
            FileDetails::new("big.rs", "word ".repeat(50)),
            FileDetails::new("empty.rs", "").with_token_count(0),
        ];
        let kept = accountant().tokenize_files(files, 20);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, "small.rs");
        assert!(kept[0].token_count.is_some());
    }
}
