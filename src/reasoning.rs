//! Reasoning-service client.
//!
//! Talks to an OpenAI-compatible chat completions endpoint with:
//! - Role-tagged messages, optionally carrying one image as a data URL
//! - `reasoning_content` fallback for thinking models
//! - Connection health checks
//!
//! # Configuration
//!
//! Settings come from `config::get().reasoning` and can be overridden with
//! the builder methods on `ReasoningConfig`. See the `config` module for the
//! environment variables.

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config;

/// Result type for reasoning-service calls
pub type ReasoningResult<T> = Result<T, ReasoningError>;

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for ReasoningError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ReasoningError::InvalidResponse(e.to_string())
        } else {
            ReasoningError::ConnectionFailed(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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
}

/// One call to the reasoning service
#[derive(Debug, Clone, Default)]
pub struct ReasoningRequest {
    pub messages: Vec<Message>,
    /// Image attached to the last user message, as a data URL
    pub image: Option<String>,
}

impl ReasoningRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::system(content));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn image_png(mut self, png: &[u8]) -> Self {
        self.image = Some(png_data_url(png));
        self
    }

    /// Concatenated text of all messages, for logging and fakes
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_body(&self, model: &str, max_tokens: u32) -> Value {
        let last_user = self.messages.iter().rposition(|m| m.role == Role::User);
        let messages: Vec<Value> = self
            .messages
            .iter()
            .enumerate()
            .map(|(idx, message)| match (&self.image, Some(idx) == last_user) {
                (Some(url), true) => json!({
                    "role": message.role,
                    "content": [
                        {"type": "image_url", "image_url": {"url": url}},
                        {"type": "text", "text": message.content}
                    ]
                }),
                _ => json!({"role": message.role, "content": message.content}),
            })
            .collect();

        json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        })
    }
}

pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Anything that can answer a reasoning request with text
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, request: ReasoningRequest) -> ReasoningResult<String>;
}

/// Configuration for the chat client
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Upper bound for a single HTTP exchange (seconds)
    pub request_timeout: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        let cfg = &config::get().reasoning;
        Self {
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            max_tokens: cfg.max_tokens,
            request_timeout: cfg.delegate_timeout,
        }
    }
}

impl ReasoningConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }
}

/// HTTP client for an OpenAI-compatible chat completions endpoint
pub struct ChatClient {
    config: ReasoningConfig,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ReasoningConfig) -> ReasoningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Reasoner for ChatClient {
    async fn complete(&self, request: ReasoningRequest) -> ReasoningResult<String> {
        let body = request.to_body(&self.config.model, self.config.max_tokens);
        debug!("[reasoning] request: {}", request.text());

        let mut builder = self.http.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout(Duration::from_secs(self.config.request_timeout))
            } else {
                ReasoningError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let value: Value = response.json().await?;
        let content = extract_content(&value)?;
        debug!("[reasoning] response: {}", content);
        Ok(content)
    }
}

/// Message text of the first choice, falling back to `reasoning_content`
pub fn extract_content(response: &Value) -> ReasoningResult<String> {
    let message = &response["choices"][0]["message"];
    if message.is_null() {
        return Err(ReasoningError::InvalidResponse(
            "response has no choices[0].message".to_string(),
        ));
    }

    let content = message["content"].as_str().unwrap_or("").trim();
    if !content.is_empty() {
        return Ok(content.to_string());
    }
    match message["reasoning_content"].as_str().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(ReasoningError::InvalidResponse("empty message content".to_string())),
    }
}

/// Check whether the reasoning endpoint's host accepts connections.
///
/// Any HTTP response counts as reachable; only connection failures do not.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> ReasoningResult<bool> {
    let url = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");
    let scheme = if endpoint.starts_with("https://") { "https" } else { "http" };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    match client.head(format!("{}://{}", scheme, host_port)).send().await {
        Ok(_) => Ok(true),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
