//! LLM completion layer
//!
//! Provides a `CompletionBackend` trait with one production implementation:
//! `ChatCompletionClient`, an OpenAI-compatible chat-completions client (the
//! service targets DeepSeek's endpoint by default). The transport is the only
//! genuinely external blocking call in the pipeline, so it carries a request
//! timeout and a bounded retry policy with exponential backoff and jitter.
//! Transient failures (timeouts, rate limits, 5xx) are retried; everything
//! else surfaces immediately. Malformed *content* is never retried here —
//! that is the repair engine's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::LlmSettings;

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run one completion and return the raw assistant text. No format
    /// guarantee on the content.
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion request timed out")]
    Timeout,

    #[error("rate limited by completion API: {message}")]
    RateLimited { message: String },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("completion response contained no choices")]
    EmptyCompletion,

    #[error("missing API key")]
    MissingApiKey,

    #[error("all {attempts} completion attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl LlmError {
    /// Transient errors are worth another attempt; the rest fail fast.
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } => true,
            LlmError::Api { code, .. } => *code >= 500,
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn new(api_key: Option<String>, settings: &LlmSettings) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("CANOPY_API_KEY").ok())
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: settings.model.clone(),
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            timeout_seconds: settings.timeout_seconds,
            max_tokens: settings.max_tokens,
        }
    }
}

// ============================================================================
// Chat API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: Option<ChatErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}

// ============================================================================
// ChatCompletionClient
// ============================================================================

/// OpenAI-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl ChatCompletionClient {
    pub fn new(config: LlmConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(body);

            if status.as_u16() == 429 {
                tracing::warn!(message = %message, "Completion API rate limit hit");
                return Err(LlmError::RateLimited { message });
            }

            tracing::error!(code = status.as_u16(), message = %message, "Completion API error");
            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }

        Ok(content)
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(system, user),
            LlmError::is_transient,
        )
        .await;

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All completion attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(max_retries: usize) -> LlmConfig {
        LlmConfig {
            api_key: "test-api-key".to_string(),
            model: "deepseek-chat".to_string(),
            max_retries,
            retry_delay_ms: 10,
            timeout_seconds: 5,
            max_tokens: 1500,
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        let mut config = test_config(1);
        config.api_key = String::new();
        let err = ChatCompletionClient::new(config, "http://localhost".to_string())
            .err()
            .expect("missing key must fail");
        assert!(matches!(err, LlmError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_complete_posts_messages_and_returns_content() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::new(test_config(1), mock_server.uri())
            .expect("client should build");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "usr" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("[]")))
            .mount(&mock_server)
            .await;

        let text = client.complete("sys", "usr").await.expect("completion should succeed");
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_until_success() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::new(test_config(3), mock_server.uri())
            .expect("client should build");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "slow down" }
            })))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&mock_server)
            .await;

        let text = client.complete("sys", "usr").await.expect("should recover after 429s");
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_terminal_error() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::new(test_config(2), mock_server.uri())
            .expect("client should build");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&mock_server)
            .await;

        let err = client.complete("sys", "usr").await.expect_err("must exhaust retries");
        match err {
            LlmError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::new(test_config(3), mock_server.uri())
            .expect("client should build");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "bad request" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.complete("sys", "usr").await.expect_err("must fail fast");
        match err {
            LlmError::Api { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::new(test_config(1), mock_server.uri())
            .expect("client should build");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        let err = client.complete("sys", "usr").await.expect_err("must reject empty choices");
        assert!(matches!(err, LlmError::EmptyCompletion));
    }
}
