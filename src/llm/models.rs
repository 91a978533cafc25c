// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Static model table: context sizes, output limits and pricing per model.
//!
//! The table is configuration, not something the pipeline computes. Entries
//! from `[models.<id>]` in the config file override or extend the built-in
//! ones.

use crate::llm::provider::Pricing;
use crate::utils::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tokens held back from every context window for the reply.
pub const DEFAULT_SAFETY_MARGIN: usize = 100;

/// Gemini's OpenAI-compatible endpoint.
const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Which provider implementation serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ForgeError> {
        match name.to_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAI),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(ForgeError::invalid_provider(name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: ProviderKind,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    #[serde(flatten)]
    pub pricing: Pricing,
    /// Endpoint override for OpenAI-compatible gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key when it is not the
    /// provider's usual one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl ModelInfo {
    pub fn new(
        provider: ProviderKind,
        max_input_tokens: usize,
        max_output_tokens: usize,
        pricing: Pricing,
    ) -> Self {
        Self {
            provider,
            max_input_tokens,
            max_output_tokens,
            pricing,
            base_url: None,
            api_key_env: None,
        }
    }
}

/// Maximum number of tokens a prompt may occupy for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenBudget(pub usize);

impl TokenBudget {
    pub fn get(self) -> usize {
        self.0
    }

    /// Whether `tokens` fits inside the budget.
    pub fn admits(self, tokens: usize) -> bool {
        tokens <= self.0
    }
}

impl std::fmt::Display for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ModelTable {
    models: HashMap<String, ModelInfo>,
    safety_margin: usize,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelTable {
    /// An empty table; useful when every model comes from configuration.
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    /// The models the pipeline knows out of the box.
    ///
    /// Input windows are deliberately capped well below what the providers
    /// accept to keep latency and cost predictable.
    pub fn builtin() -> Self {
        let per_million = |input: f64, output: f64| Pricing {
            input_per_1k: input / 1000.0,
            output_per_1k: output / 1000.0,
        };

        let mut table = Self::empty();
        table.insert(
            "gpt-4o",
            ModelInfo::new(ProviderKind::OpenAI, 50_000, 4_096, per_million(5.0, 15.0)),
        );
        table.insert(
            "gpt-4o-mini",
            ModelInfo::new(ProviderKind::OpenAI, 50_000, 16_384, per_million(0.15, 0.6)),
        );
        table.insert(
            "claude-3-5-sonnet-20240620",
            ModelInfo::new(ProviderKind::Anthropic, 50_000, 8_192, per_million(3.0, 15.0)),
        );
        table.insert(
            "claude-3-haiku-20240307",
            ModelInfo::new(ProviderKind::Anthropic, 50_000, 4_096, per_million(0.25, 1.25)),
        );
        table.insert(
            "gemini-1.5-flash",
            ModelInfo {
                base_url: Some(GEMINI_OPENAI_BASE_URL.to_string()),
                api_key_env: Some("GEMINI_API_KEY".to_string()),
                ..ModelInfo::new(ProviderKind::OpenAI, 200_000, 4_096, per_million(0.0, 0.0))
            },
        );
        table
    }

    pub fn with_safety_margin(mut self, safety_margin: usize) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, info: ModelInfo) {
        self.models.insert(model.into(), info);
    }

    pub fn get(&self, model: &str) -> Result<&ModelInfo, ForgeError> {
        self.models
            .get(model)
            .ok_or_else(|| ForgeError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// `max_input_tokens - safety_margin` for `model`.
    pub fn budget(&self, model: &str) -> Result<TokenBudget, ForgeError> {
        let info = self.get(model)?;
        Ok(TokenBudget(
            info.max_input_tokens.saturating_sub(self.safety_margin),
        ))
    }

    pub fn safety_margin(&self) -> usize {
        self.safety_margin
    }

    /// Iterate over `(model id, info)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelInfo)> {
        self.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_budget_subtracts_margin() {
        let table = ModelTable::builtin();
        assert_eq!(table.budget("gpt-4o").unwrap(), TokenBudget(49_900));
        assert_eq!(
            table.budget("gemini-1.5-flash").unwrap(),
            TokenBudget(199_900)
        );
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let table = ModelTable::builtin();
        let err = table.budget("gpt-2").unwrap_err();
        assert!(matches!(err, ForgeError::UnknownModel { ref model } if model == "gpt-2"));
    }

    #[test]
    fn test_custom_margin_and_entry() {
        let mut table = ModelTable::empty().with_safety_margin(0);
        table.insert(
            "tiny",
            ModelInfo::new(ProviderKind::Ollama, 250, 50, Pricing::default()),
        );
        let budget = table.budget("tiny").unwrap();
        assert!(budget.admits(250));
        assert!(!budget.admits(251));
    }

    #[test]
    fn test_margin_larger_than_window_saturates() {
        let mut table = ModelTable::empty().with_safety_margin(1_000);
        table.insert(
            "small",
            ModelInfo::new(ProviderKind::Ollama, 10, 10, Pricing::default()),
        );
        assert_eq!(table.budget("small").unwrap(), TokenBudget(0));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(
            ProviderKind::parse("Anthropic").unwrap(),
            ProviderKind::Anthropic
        );
        assert!(ProviderKind::parse("bedrock").is_err());
    }

    #[test]
    fn test_pricing_per_million_conversion() {
        let table = ModelTable::builtin();
        let info = table.get("claude-3-5-sonnet-20240620").unwrap();
        assert!((info.pricing.input_per_1k - 0.003).abs() < 1e-12);
        assert!((info.pricing.output_per_1k - 0.015).abs() < 1e-12);
    }
}
