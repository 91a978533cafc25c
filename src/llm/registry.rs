// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Model identifier to inference client dispatch.
//!
//! Stages never branch on provider names. They ask the registry for the
//! client serving a model, which is either registered explicitly or built on
//! first use from the model table.

use crate::llm::client::{LLMClient, RetryConfig};
use crate::llm::models::{ModelInfo, ModelTable, ProviderKind};
use crate::llm::provider::{CompletionOptions, LLMProvider};
use crate::utils::error::ForgeError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Endpoint overrides and client behaviour for the providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub anthropic_api_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_host: Option<String>,
    /// Per-provider cap on the reply length, below the model's own limit.
    pub max_output_tokens: HashMap<ProviderKind, usize>,
    pub temperature: Option<f32>,
    pub retry: RetryConfig,
}

impl ProviderSettings {
    /// Reply length for a model served by `info.provider`.
    pub fn output_tokens_for(&self, info: &ModelInfo) -> usize {
        self.max_output_tokens
            .get(&info.provider)
            .map_or(info.max_output_tokens, |cap| {
                (*cap).min(info.max_output_tokens)
            })
    }
}

#[derive(Debug)]
pub struct ProviderRegistry {
    table: ModelTable,
    settings: ProviderSettings,
    clients: Mutex<HashMap<String, Arc<LLMClient>>>,
}

impl ProviderRegistry {
    pub fn new(table: ModelTable, settings: ProviderSettings) -> Self {
        Self {
            table,
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn models(&self) -> &ModelTable {
        &self.table
    }

    /// Serve `model` with an explicit client instead of building one.
    pub fn register(&self, model: impl Into<String>, client: Arc<LLMClient>) {
        self.lock_clients().insert(model.into(), client);
    }

    /// The client cache, recovered if a panic poisoned its lock.
    fn lock_clients(&self) -> MutexGuard<'_, HashMap<String, Arc<LLMClient>>> {
        self.clients.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Client cache lock was poisoned; recovering");
            self.clients.clear_poison();
            poisoned.into_inner()
        })
    }

    /// The client for `model`, building and caching it on first use.
    ///
    /// # Errors
    ///
    /// `UnknownModel` when the model is neither registered nor in the table;
    /// a validation error when its provider is not compiled in or has no
    /// credentials.
    pub fn get(&self, model: &str) -> Result<Arc<LLMClient>, ForgeError> {
        if let Some(client) = self.lock_clients().get(model).cloned() {
            return Ok(client);
        }

        let info = self.table.get(model)?;
        let provider = build_provider(model, info, &self.settings)?;
        let max_tokens = self.settings.output_tokens_for(info);

        let client = Arc::new(
            LLMClient::new(provider)
                .with_retry_config(self.settings.retry.clone())
                .with_options(CompletionOptions {
                    max_tokens: Some(max_tokens),
                    temperature: self.settings.temperature,
                }),
        );

        tracing::debug!(model, provider = info.provider.as_str(), "Created inference client");
        self.register(model, Arc::clone(&client));
        Ok(client)
    }
}

#[allow(unused_variables)]
fn build_provider(
    model: &str,
    info: &ModelInfo,
    settings: &ProviderSettings,
) -> Result<Arc<dyn LLMProvider>, ForgeError> {
    match info.provider {
        #[cfg(feature = "anthropic")]
        ProviderKind::Anthropic => {
            use crate::llm::providers::anthropic::AnthropicProvider;

            let mut provider = match &info.api_key_env {
                Some(var) => AnthropicProvider::new(
                    std::env::var(var).map_err(|_| ForgeError::missing_api_key("anthropic"))?,
                    model.to_string(),
                    info.pricing,
                )?,
                None => AnthropicProvider::from_env(model.to_string(), info.pricing)?,
            };
            if let Some(url) = info.base_url.as_ref().or(settings.anthropic_api_url.as_ref()) {
                provider = provider.with_api_url(url.clone());
            }
            Ok(Arc::new(provider))
        }
        #[cfg(feature = "openai")]
        ProviderKind::OpenAI => {
            use crate::llm::providers::openai::OpenAIProvider;

            let mut provider = match &info.api_key_env {
                Some(var) => OpenAIProvider::new(
                    std::env::var(var).map_err(|_| ForgeError::ValidationError {
                        message: format!("API key not configured for model '{}'", model),
                        suggestion: format!("Set the {} environment variable", var),
                    })?,
                    model.to_string(),
                    info.pricing,
                )?,
                None => OpenAIProvider::from_env(model.to_string(), info.pricing)?,
            };
            if let Some(url) = info.base_url.as_ref().or(settings.openai_base_url.as_ref()) {
                provider = provider.with_base_url(url.clone());
            }
            Ok(Arc::new(provider))
        }
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => {
            use crate::llm::providers::ollama::OllamaProvider;

            let provider = match info.base_url.as_ref().or(settings.ollama_host.as_ref()) {
                Some(host) => OllamaProvider::new(host.clone(), model.to_string())?,
                None => OllamaProvider::from_env(model.to_string())?,
            };
            Ok(Arc::new(provider))
        }
        #[allow(unreachable_patterns)]
        other => Err(ForgeError::ValidationError {
            message: format!(
                "Provider '{}' for model '{}' is not compiled into this build",
                other.as_str(),
                model
            ),
            suggestion: format!("Rebuild with --features {}", other.as_str()),
        }),
    }
}
