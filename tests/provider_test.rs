// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Provider HTTP plumbing against mockito servers.

use mockito::Matcher;
use serde_json::json;
use specforge::llm::provider::{CompletionOptions, LLMProvider, Message, Pricing};
use specforge::utils::error::ForgeError;
use std::time::Duration;

fn messages() -> Vec<Message> {
    vec![Message::system("You are terse."), Message::user("Say hi")]
}

fn options() -> CompletionOptions {
    CompletionOptions {
        max_tokens: Some(256),
        temperature: None,
    }
}

#[cfg(feature = "anthropic")]
mod anthropic_tests {
    use super::*;
    use specforge::llm::client::{LLMClient, RetryConfig};
    use specforge::llm::providers::anthropic::AnthropicProvider;
    use std::sync::Arc;

    fn provider(server: &mockito::Server) -> AnthropicProvider {
        AnthropicProvider::new(
            "test-key".to_string(),
            "claude-3-5-sonnet-20240620".to_string(),
            Pricing {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        )
        .unwrap()
        .with_api_url(format!("{}/v1/messages", server.url()))
    }

    #[tokio::test]
    async fn test_system_prompt_is_a_top_level_field() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-3-5-sonnet-20240620",
                "max_tokens": 256,
                "system": "You are terse.",
                "messages": [{"role": "user", "content": "Say hi"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"text","text":"Hi"},{"type":"text","text":" there"}],
                    "usage":{"input_tokens":12,"output_tokens":3}}"#,
            )
            .create_async()
            .await;

        let response = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap();

        assert_eq!(response.content, "Hi there");
        assert_eq!(response.prompt_tokens, 12);
        assert_eq!(response.completion_tokens, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "7")
            .with_body("{}")
            .create_async()
            .await;

        let err = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap_err();

        match err {
            ForgeError::RateLimited {
                provider,
                retry_after,
            } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected a rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_api_error_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(400)
            .with_body(r#"{"error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("invalid_request_error"));
        assert!(text.contains("max_tokens too large"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_prices_the_reported_usage() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                r#"{"content":[{"type":"text","text":"ok"}],
                    "usage":{"input_tokens":2000,"output_tokens":1000}}"#,
            )
            .create_async()
            .await;

        let client = LLMClient::new(Arc::new(provider(&server))).with_retry_config(RetryConfig::none());
        let generation = client.generate_response("sys", "user").await.unwrap();

        assert_eq!(generation.content, "ok");
        assert!((generation.cost - (0.006 + 0.015)).abs() < 1e-9);
    }
}

#[cfg(feature = "openai")]
mod openai_tests {
    use super::*;
    use specforge::llm::providers::openai::OpenAIProvider;

    fn provider(server: &mockito::Server) -> OpenAIProvider {
        OpenAIProvider::new("sk-test".to_string(), "gpt-4o".to_string(), Pricing::default())
            .unwrap()
            .with_base_url(format!("{}/v1/", server.url()))
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o",
                "max_tokens": 256,
                "messages": [
                    {"role": "system", "content": "You are terse."},
                    {"role": "user", "content": "Say hi"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"Hi"}}],
                    "usage":{"prompt_tokens":10,"completion_tokens":2}}"#,
            )
            .create_async()
            .await;

        let response = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap();

        assert_eq!(response.content, "Hi");
        assert_eq!(response.prompt_tokens, 10);
        assert_eq!(response.completion_tokens, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_usage_counts_as_zero() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"Hi"}}]}"#)
            .create_async()
            .await;

        let response = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap();

        assert_eq!(response.prompt_tokens, 0);
        assert_eq!(response.completion_tokens, 0);
    }

    #[tokio::test]
    async fn test_error_body_is_reported_and_key_redacted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(
                r#"{"error":{"type":"invalid_request_error","message":"Incorrect API key provided: sk-abcdefghijklmnopqrstuvwxyz"}}"#,
            )
            .create_async()
            .await;

        let err = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("invalid_request_error"));
        assert!(!text.contains("sk-abcdefghijklmnopqrstuvwxyz"));
    }

    #[tokio::test]
    async fn test_rate_limit_without_hint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let err = provider(&server)
            .complete(&messages(), &options())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ForgeError::RateLimited {
                retry_after: None,
                ..
            }
        ));
        assert!(err.is_retryable());
    }
}

#[cfg(feature = "ollama")]
mod ollama_tests {
    use super::*;
    use specforge::llm::providers::ollama::OllamaProvider;

    #[tokio::test]
    async fn test_chat_is_not_streamed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama3.1",
                "stream": false,
                "options": {"num_predict": 256}
            })))
            .with_status(200)
            .with_body(
                r#"{"message":{"role":"assistant","content":"Hi"},"prompt_eval_count":9,"eval_count":4,"done":true}"#,
            )
            .create_async()
            .await;

        let provider = OllamaProvider::new(server.url(), "llama3.1".to_string()).unwrap();
        let response = provider.complete(&messages(), &options()).await.unwrap();

        assert_eq!(response.content, "Hi");
        assert_eq!(response.prompt_tokens, 9);
        assert_eq!(response.completion_tokens, 4);
        assert_eq!(provider.pricing(), Pricing::default());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_daemon_error_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error":"model 'llama3.1' not found"}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(server.url(), "llama3.1".to_string()).unwrap();
        let err = provider.complete(&messages(), &options()).await.unwrap_err();

        assert!(err.to_string().contains("not found"));
    }
}
