// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! The inference-provider collaborator as the pipeline sees it.
//!
//! `LLMClient` turns `(system prompt, user prompt)` into a [`Generation`]:
//! generated text, provider-reported token counts and cost. Transient
//! failures are retried here with exponential backoff; stages above never
//! retry.

use crate::llm::cost::CostCalculator;
use crate::llm::provider::{CompletionOptions, LLMProvider, Message, Pricing};
use crate::utils::error::ForgeError;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_factor: 3,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at
    /// `max_delay_ms`. A provider-supplied `retry_after` takes precedence.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        if let Some(hint) = retry_after {
            return hint.min(cap);
        }
        let factor = u64::from(self.backoff_factor).saturating_pow(attempt);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor)).min(cap)
    }
}

/// One completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Dollars, priced from the provider-reported token counts.
    pub cost: f64,
}

pub struct LLMClient {
    provider: Arc<dyn LLMProvider>,
    retry_config: RetryConfig,
    options: CompletionOptions,
    calculator: CostCalculator,
}

impl std::fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMClient")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("retry_config", &self.retry_config)
            .finish_non_exhaustive()
    }
}

impl LLMClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let calculator = CostCalculator::new(provider.pricing());
        Self {
            provider,
            retry_config: RetryConfig::default(),
            options: CompletionOptions::default(),
            calculator,
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Generate a reply for one system/user prompt pair.
    ///
    /// Retries `RateLimited` and `NetworkError` failures; any other error,
    /// or the last retryable one, is returned as is.
    pub async fn generate_response(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Generation, ForgeError> {
        let messages = [Message::system(system_prompt), Message::user(user_prompt)];
        let mut attempt = 0u32;

        loop {
            match self.provider.complete(&messages, &self.options).await {
                Ok(response) => {
                    let cost = self
                        .calculator
                        .calculate_cost(response.prompt_tokens, response.completion_tokens);
                    return Ok(Generation {
                        content: response.content,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                        cost,
                    });
                }
                Err(err) if err.is_retryable() && attempt < self.retry_config.max_retries => {
                    let retry_after = match &err {
                        ForgeError::RateLimited { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = self.retry_config.delay_for(attempt, retry_after);
                    attempt += 1;
                    tracing::warn!(
                        provider = self.provider.name(),
                        model = self.provider.model(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after transient failure: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn pricing(&self) -> Pricing {
        *self.calculator.pricing()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}
