//! HTTP client for a locally hosted Ollama endpoint.
//!
//! Every completion exchange is one `POST /api/generate` with streaming
//! disabled, bounded by the per-request timeout from the active
//! configuration. Failures are sorted into retryable (timeout, transport)
//! and non-retryable (protocol) so the conversation agent can decide
//! whether a second attempt is worth anything.

pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::RequestConfig;
use wire::{GenerateRequest, GenerateResponse, ModelOptions, TagsResponse};

/// Default endpoint for a Home Assistant add-on install.
pub const DEFAULT_BASE_URL: &str = "http://homeassistant.local:11434";

/// Banner the Ollama server answers on its root path.
const HEARTBEAT_BANNER: &str = "Ollama is running";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the setup probes (`heartbeat`, `models`), which run outside
/// any per-conversation configuration.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors building the client itself.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Http(String),
}

/// How one exchange with the endpoint failed.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The endpoint did not answer within the deadline. The in-flight
    /// request is abandoned, never waited on past the deadline.
    #[error("model endpoint did not answer within {0:?}")]
    TimedOut(Duration),
    /// The endpoint could not be reached, or dropped the connection
    /// mid-exchange, or answered 5xx.
    #[error("transport failure while talking to the model endpoint: {0}")]
    Transport(String),
    /// The endpoint answered, but with something that is not a valid
    /// completion. Retrying the same request would fail the same way.
    #[error("model endpoint protocol error: {0}")]
    Protocol(String),
}

impl CompletionError {
    /// Whether a single retry with the same request is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Transport(_))
    }
}

/// Completion text plus whatever usage counts the endpoint reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// The seam the conversation agent talks through. Implemented by
/// [`OllamaClient`] in production and by fixtures in tests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// One prompt/completion exchange under `config.api_timeout`.
    async fn complete(
        &self,
        system_prompt: &str,
        utterance: &str,
        config: &RequestConfig,
    ) -> Result<Completion, CompletionError>;
}

/// Client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client for the given base URL. The URL must parse and use
    /// an http or https scheme; a trailing slash is tolerated.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        let raw = base_url.as_ref();
        let parsed = Url::parse(raw)
            .map_err(|e| ClientError::InvalidBaseUrl(format!("invalid URL \"{raw}\": {e}")))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ClientError::InvalidBaseUrl(format!(
                "base URL must use http or https scheme, got \"{scheme}\""
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: raw.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the server's root banner. `Ok(false)` means something answered
    /// on the port but it does not look like an Ollama server.
    pub async fn heartbeat(&self) -> Result<bool, CompletionError> {
        let url = format!("{}/", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify(e, PROBE_TIMEOUT))?;
        let response = check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| classify(e, PROBE_TIMEOUT))?;
        Ok(body.trim() == HEARTBEAT_BANNER)
    }

    /// List the model names the server has pulled.
    pub async fn models(&self) -> Result<Vec<String>, CompletionError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify(e, PROBE_TIMEOUT))?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| classify(e, PROBE_TIMEOUT))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(
        &self,
        system_prompt: &str,
        utterance: &str,
        config: &RequestConfig,
    ) -> Result<Completion, CompletionError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &config.model,
            prompt: utterance,
            system: system_prompt,
            stream: false,
            options: ModelOptions::from_config(config),
        };

        let response = self
            .client
            .post(&url)
            .timeout(config.api_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, config.api_timeout))?;
        let response = check_status(response).await?;
        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| classify(e, config.api_timeout))?;

        let text = payload.response.ok_or_else(|| {
            CompletionError::Protocol("response body is missing the completion text".to_string())
        })?;
        let usage = match (payload.prompt_eval_count, payload.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage {
                prompt_tokens: prompt.unwrap_or(0),
                completion_tokens: completion.unwrap_or(0),
            }),
        };
        debug!(
            model = %config.model,
            chars = text.len(),
            "completion received"
        );
        Ok(Completion { text, usage })
    }
}

/// Sort a reqwest failure into the retryable/non-retryable taxonomy.
fn classify(err: reqwest::Error, timeout: Duration) -> CompletionError {
    if err.is_timeout() {
        CompletionError::TimedOut(timeout)
    } else if err.is_decode() {
        CompletionError::Protocol(format!("failed to parse response body: {err}"))
    } else {
        CompletionError::Transport(err.to_string())
    }
}

/// Map a non-success status to an error. 5xx means the server side broke
/// and a retry may land on a healthy moment; anything else means this
/// request is wrong and a retry would repeat the failure.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable>".to_string());
    if status.is_server_error() {
        return Err(CompletionError::Transport(format!(
            "model endpoint returned {status}: {body}"
        )));
    }
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or(body);
    Err(CompletionError::Protocol(format!(
        "model endpoint returned {status}: {detail}"
    )))
}
