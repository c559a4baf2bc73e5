//! Model client for AI inference using OpenAI-compatible API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Transport-level failures talking to the model endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),
    #[error("Model returned an empty response")]
    EmptyResponse,
}

impl TransportError {
    /// Network errors, timeouts, rate limits and server errors are worth
    /// another attempt; client errors and bad payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(_) | TransportError::Timeout(_) => true,
            TransportError::Api { status, .. } => *status == 429 || *status >= 500,
            TransportError::InvalidResponse(_) | TransportError::EmptyResponse => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        } else if error.is_decode() {
            TransportError::InvalidResponse(error.to_string())
        } else {
            TransportError::Http(error.to_string())
        }
    }
}

/// Configuration for the AI model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub extra_body: HashMap<String, Value>,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one.
    pub retry_delay: Duration,
    /// Upper bound on a single request.
    pub timeout: Duration,
    /// Ask the endpoint for its native reasoning trace.
    pub thinking: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut extra_body = HashMap::new();
        extra_body.insert("skip_special_tokens".to_string(), json!(false));

        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "autoglm-phone-9b".to_string(),
            max_tokens: 3000,
            temperature: 0.0,
            top_p: 0.85,
            frequency_penalty: 0.2,
            extra_body,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_BASE_DELAY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            thinking: false,
        }
    }
}

impl ModelConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable provider-native thinking (`{"thinking": {"type": "enabled"}}`).
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = enabled;
        self
    }

    /// Add a provider-specific field to every request body.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_body.insert(key.into(), value);
        self
    }

    /// Backoff schedule derived from `max_retries` and `retry_delay`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(self.retry_delay)
    }
}

/// One reply from the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Message content, handed to the parser untouched.
    pub raw: String,
    /// Separate reasoning trace when the endpoint returns one.
    pub reasoning: Option<String>,
}

impl ModelResponse {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reasoning: None,
        }
    }
}

/// A vision-language model reachable over some transport.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Send one chat request. Implementations make a single attempt; the
    /// control loop owns timeouts and retries.
    async fn complete(&self, messages: &[Value]) -> Result<ModelResponse, TransportError>;
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Client for interacting with OpenAI-compatible vision-language models.
pub struct ModelClient {
    config: ModelConfig,
    client: Client,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn request_body(&self, messages: &[Value]) -> Value {
        let mut body = json!({
            "messages": messages,
            "model": self.config.model_name,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "frequency_penalty": self.config.frequency_penalty,
        });

        if let Value::Object(ref mut map) = body {
            for (key, value) in &self.config.extra_body {
                map.insert(key.clone(), value.clone());
            }
            if self.config.thinking {
                map.insert("thinking".to_string(), json!({ "type": "enabled" }));
            }
        }
        body
    }
}

#[async_trait]
impl VisionModel for ModelClient {
    async fn complete(&self, messages: &[Value]) -> Result<ModelResponse, TransportError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.request_body(messages);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::Timeout(_) => TransportError::Timeout(self.config.timeout),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        extract_response(completion)
    }
}

fn extract_response(completion: ChatCompletionResponse) -> Result<ModelResponse, TransportError> {
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| TransportError::InvalidResponse("no choices in response".to_string()))?;

    let raw = message.content.unwrap_or_default();
    let reasoning = message.reasoning_content.filter(|r| !r.trim().is_empty());
    if raw.trim().is_empty() && reasoning.is_none() {
        return Err(TransportError::EmptyResponse);
    }
    Ok(ModelResponse { raw, reasoning })
}

/// Helper for building conversation messages.
pub struct MessageBuilder;

impl MessageBuilder {
    pub fn create_system_message(content: &str) -> Value {
        json!({
            "role": "system",
            "content": content
        })
    }

    /// Create a user message with an optional image given as a data URL.
    pub fn create_user_message(text: &str, image_url: Option<&str>) -> Value {
        let mut content = Vec::new();

        if let Some(url) = image_url {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": url }
            }));
        }

        content.push(json!({
            "type": "text",
            "text": text
        }));

        json!({
            "role": "user",
            "content": content
        })
    }

    pub fn create_assistant_message(content: &str) -> Value {
        json!({
            "role": "assistant",
            "content": content
        })
    }

    /// `data:` URL for an inline image.
    pub fn data_url(mime_type: &str, base64_data: &str) -> String {
        format!("data:{};base64,{}", mime_type, base64_data)
    }

    /// Drop image parts from a message, keeping its text.
    pub fn remove_images_from_message(message: &mut Value) {
        if let Some(Value::Array(parts)) = message.get_mut("content") {
            parts.retain(|item| item.get("type").and_then(Value::as_str) == Some("text"));
        }
    }

    /// Screen info text sent alongside every screenshot after the first.
    pub fn build_screen_info(current_app: &str) -> String {
        json!({
            "current_app": current_app
        })
        .to_string()
    }
}
