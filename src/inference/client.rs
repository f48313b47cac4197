//! Chat-completion client for field inference.
//!
//! Speaks the OpenAI-compatible `chat/completions` protocol (Groq by default)
//! and always asks for a JSON object reply. Failed calls are retried with
//! exponential backoff up to [`RetryPolicy::max_attempts`].

use crate::config::InferenceConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable holding the API key.
pub const API_KEY_VAR: &str = "GROQ_API_KEY";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("GROQ_API_KEY is not set")]
    MissingCredential,

    #[error("inference service returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference service returned no choices")]
    EmptyResponse,
}

impl InferenceError {
    /// Timeouts, connection errors, 5xx, 408 and 429 are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::MissingCredential | InferenceError::EmptyResponse => false,
            InferenceError::Transport(_) => true,
            InferenceError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// A chat model that answers with a JSON document.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Whether calls can be made at all (credential present).
    fn is_available(&self) -> bool;

    /// Raw text of the first choice.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&InferenceConfig> for RetryPolicy {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T, InferenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, "Inference call failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Groq (or any OpenAI-compatible) chat-completions endpoint.
pub struct GroqClient {
    api_key: Option<String>,
    api_url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl GroqClient {
    pub fn new(config: &InferenceConfig, api_key: Option<String>) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            retry: RetryPolicy::from(config),
            client,
        })
    }

    /// Build a client with the key from [`API_KEY_VAR`].
    pub fn from_env(config: &InferenceConfig) -> Result<Self, InferenceError> {
        Self::new(config, std::env::var(API_KEY_VAR).ok())
    }

    async fn send_once(&self, api_key: &str, system: &str, user: &str) -> Result<String, InferenceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(InferenceError::EmptyResponse)
    }
}

#[async_trait]
impl ChatCompletion for GroqClient {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let api_key = self.api_key.as_deref().ok_or(InferenceError::MissingCredential)?;
        debug!(model = %self.model, "Requesting chat completion");
        retry_with_backoff(self.retry, || self.send_once(api_key, system, user)).await
    }
}
