// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Token estimation for prompts and files.
//!
//! Budgeting and the `calculated_tokens` figure reported back to callers both
//! go through the same [`Tokenizer`], so an estimate for a given text never
//! changes between the two. Provider-reported token counts are tracked
//! separately and are never fed back into budgeting.
//!
//! # Example
//!
//! ```
//! use specforge::llm::tokenizer::{TiktokenTokenizer, Tokenizer, TokenizerModel};
//!
//! let tokenizer = TiktokenTokenizer::new(TokenizerModel::Cl100k).unwrap();
//! let count = tokenizer.count_tokens("Hello, world!");
//! assert!(count > 0);
//! ```

use crate::utils::error::ForgeError;
use tiktoken_rs::{cl100k_base, o200k_base};

/// Trait for counting tokens in text.
///
/// Implementations must be deterministic: the same text always yields the
/// same count.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;
}

/// BPE encodings available for estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerModel {
    /// cl100k_base, the default approximation for every provider.
    #[default]
    Cl100k,
    /// o200k_base, used by the GPT-4o family.
    O200k,
}

impl TokenizerModel {
    /// Pick an encoding from a model identifier.
    ///
    /// Anything that is not recognisably a GPT-4o/o1 model falls back to
    /// cl100k_base, which is close enough for Claude and Gemini models.
    pub fn from_model_name(model: &str) -> Self {
        let model_lower = model.to_lowercase();

        if model_lower.contains("gpt-4o") || model_lower.starts_with("o1") {
            return Self::O200k;
        }

        Self::Cl100k
    }
}

/// Tokenizer backed by tiktoken's BPE tables.
pub struct TiktokenTokenizer {
    encoding: tiktoken_rs::CoreBPE,
}

impl TiktokenTokenizer {
    /// Create a new tiktoken tokenizer for the given encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding tables cannot be loaded.
    pub fn new(model: TokenizerModel) -> Result<Self, ForgeError> {
        let encoding = match model {
            TokenizerModel::Cl100k => cl100k_base(),
            TokenizerModel::O200k => o200k_base(),
        }
        .map_err(|e| ForgeError::Config(format!("Failed to load tokenizer: {}", e)))?;

        Ok(Self { encoding })
    }

    /// Create a tokenizer from a model identifier.
    pub fn from_model_name(model_name: &str) -> Result<Self, ForgeError> {
        Self::new(TokenizerModel::from_model_name(model_name))
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer").finish_non_exhaustive()
    }
}
