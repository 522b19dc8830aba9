use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::LLMConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Failure outcomes of a single completion call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    #[error("provider returned status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("model is still loading")]
    ModelLoading,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("unexpected response format")]
    MalformedResponse,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A chat-completion backend. `LLMClient` talks HTTP; tests plug in stubs.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

pub struct LLMClient {
    client: Client,
    api_key: String,
    config: LLMConfig,
    timeout: Duration,
}

impl LLMClient {
    pub fn new(api_key: String, config: LLMConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            client: Client::new(),
            api_key,
            config,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CompletionProvider for LLMClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        tracing::debug!(
            "[LLMClient] Sending {} messages to {}",
            request.messages.len(),
            self.config.endpoint
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        // The body may still be streaming when the deadline hits.
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            tracing::warn!("[LLMClient] API returned error status {}: {}", status, body);
            if provider_error(&body).is_some_and(|msg| is_loading(&msg)) {
                return Err(CompletionError::ModelLoading);
            }
            return Err(CompletionError::Status(status.as_u16()));
        }

        parse_completion(&body)
    }
}

fn classify_transport(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        tracing::warn!("[LLMClient] Request timed out: {}", err);
        CompletionError::Timeout
    } else {
        tracing::warn!("[LLMClient] HTTP request failed: {}", err);
        CompletionError::Transport(err.to_string())
    }
}

fn is_loading(message: &str) -> bool {
    message.to_lowercase().contains("loading")
}

/// Extract the provider's `error` field, either a plain string or `{message: ..}`.
fn provider_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(msg) => Some(msg.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_completion(body: &str) -> Result<String, CompletionError> {
    if let Some(msg) = provider_error(body) {
        tracing::warn!("[LLMClient] Provider reported error: {}", msg);
        if is_loading(&msg) {
            return Err(CompletionError::ModelLoading);
        }
        return Err(CompletionError::Provider(msg));
    }

    let value: Value = serde_json::from_str(body).map_err(|e| {
        tracing::warn!("[LLMClient] Failed to decode response body: {}", e);
        CompletionError::MalformedResponse
    })?;

    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            tracing::warn!("[LLMClient] Response missing choices[0].message.content");
            CompletionError::MalformedResponse
        })
}
