// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Splitting a file set that exceeds the budget into sequential chunks.
//!
//! Packing is greedy in input order: files are never reordered to reduce the
//! number of chunks, because order carries relevance ranking. The chunks
//! partition the input exactly, so concatenating `chunk.files` yields the
//! original list.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use specforge::llm::budget::TokenAccountant;
//! use specforge::llm::chunker::ChunkPlanner;
//! use specforge::llm::models::TokenBudget;
//! use specforge::llm::tokenizer::{TiktokenTokenizer, TokenizerModel};
//! use specforge::pipeline::files::FileDetails;
//!
//! let tokenizer = TiktokenTokenizer::new(TokenizerModel::Cl100k).unwrap();
//! let planner = ChunkPlanner::new(TokenAccountant::new(Arc::new(tokenizer)));
//! let files = vec![
//!     FileDetails::new("a.rs", "").with_token_count(100),
//!     FileDetails::new("b.rs", "").with_token_count(100),
//!     FileDetails::new("c.rs", "").with_token_count(100),
//! ];
//! let chunks = planner.split_in_chunks(TokenBudget(250), "", &files);
//! assert_eq!(chunks.len(), 2);
//! ```

use super::budget::TokenAccountant;
use super::models::TokenBudget;
use crate::pipeline::files::FileDetails;

/// A token-bounded slice of the candidate files, processed as one provider
/// call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub files: Vec<FileDetails>,
    /// Fixed prompt cost plus the cost of every file in the chunk.
    pub tokens: usize,
}

impl Chunk {
    /// True only for a chunk isolating a single file too large for any
    /// chunk; the planner never produces any other over-budget chunk.
    pub fn is_over_budget(&self, budget: TokenBudget) -> bool {
        !budget.admits(self.tokens)
    }
}

#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    accountant: TokenAccountant,
}

impl ChunkPlanner {
    pub fn new(accountant: TokenAccountant) -> Self {
        Self { accountant }
    }

    /// Partition `files` into chunks that each fit next to `fixed_prompt`.
    ///
    /// A file that cannot fit even in an empty chunk is isolated in a chunk
    /// of its own, which then exceeds the budget. Empty input yields no
    /// chunks.
    pub fn split_in_chunks(
        &self,
        budget: TokenBudget,
        fixed_prompt: &str,
        files: &[FileDetails],
    ) -> Vec<Chunk> {
        let fixed_cost = self.accountant.estimate_tokens(fixed_prompt);
        let mut chunks = Vec::new();
        let mut current: Vec<FileDetails> = Vec::new();
        let mut current_tokens = 0usize;

        for file in files {
            let tokens = self.accountant.file_tokens(file);

            if !current.is_empty() && !budget.admits(fixed_cost + current_tokens + tokens) {
                chunks.push(Chunk {
                    files: std::mem::take(&mut current),
                    tokens: fixed_cost + current_tokens,
                });
                current_tokens = 0;
            }

            current.push(file.clone());
            current_tokens += tokens;
        }

        if !current.is_empty() {
            chunks.push(Chunk {
                files: current,
                tokens: fixed_cost + current_tokens,
            });
        }

        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.is_over_budget(budget) {
                tracing::warn!(
                    chunk = index + 1,
                    path = %chunk.files[0].path,
                    tokens = chunk.tokens,
                    budget = budget.get(),
                    "File exceeds the budget on its own; sending it as an oversized chunk"
                );
            }
        }

        tracing::debug!(
            files = files.len(),
            chunks = chunks.len(),
            budget = budget.get(),
            "Planned chunks"
        );
        chunks
    }
}
