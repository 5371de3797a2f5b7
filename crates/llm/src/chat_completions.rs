//! OpenAI-compatible `/chat/completions` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use pipeline::{CompletionRequest, LlmProvider, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Connection settings for [`ChatCompletionsProvider`].
#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    /// Endpoint root; `/chat/completions` is appended. For Azure this is the
    /// deployment URL (`https://<resource>.openai.azure.com/openai/deployments/<name>`).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// When set, requests use Azure conventions: an `api-version` query
    /// parameter and an `api-key` header instead of bearer auth.
    pub api_version: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ChatCompletionsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_version: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Errors raised while constructing a provider.
#[derive(Debug, Error)]
pub enum LlmSetupError {
    #[error("LLM API key is empty")]
    MissingApiKey,

    #[error("LLM base URL '{0}' is not an http(s) URL")]
    InvalidBaseUrl(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// [`LlmProvider`] for OpenAI-compatible chat-completion APIs.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    config: ChatCompletionsConfig,
    endpoint: String,
    http: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// # Errors
    ///
    /// [`LlmSetupError`] if the key is empty, the URL is not http(s), or the
    /// HTTP client cannot be built.
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, LlmSetupError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmSetupError::MissingApiKey);
        }
        let base = config.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(LlmSetupError::InvalidBaseUrl(config.base_url.clone()));
        }

        let endpoint = match &config.api_version {
            Some(version) => format!("{base}/chat/completions?api-version={version}"),
            None => format!("{base}/chat/completions"),
        };
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            endpoint,
            http,
        })
    }

    fn is_azure(&self) -> bool {
        self.config.api_version.is_some()
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, temperature = request.temperature))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            // Azure binds the model to the deployment URL.
            model: (!self.is_azure()).then_some(self.config.model.as_str()),
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let builder = self.http.post(&self.endpoint).json(&body);
        let builder = if self.is_azure() {
            builder.header("api-key", &self.config.api_key)
        } else {
            builder.bearer_auth(&self.config.api_key)
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Chat completion request failed");
            return Err(ProviderError::from_status(status.as_u16(), retry_after, &text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                transport_error(err)
            } else {
                ProviderError::MalformedResponse {
                    message: err.to_string(),
                }
            }
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse {
                message: "response contained no message content".into(),
            })
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            message: err.to_string(),
        }
    } else {
        ProviderError::Transport {
            message: err.to_string(),
        }
    }
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
