//! Wire types for the Ollama generate API.

use serde::{Deserialize, Serialize};

use crate::config::RequestConfig;

/// Body of `POST /api/generate`. `stream` is always false here; the
/// exchange is a single request and a single JSON response.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub system: &'a str,
    pub stream: bool,
    pub options: ModelOptions,
}

/// Sampling options forwarded to the model runner, named as the runner
/// names them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub num_ctx: u32,
    pub num_predict: i64,
    pub mirostat: u8,
    pub mirostat_eta: f64,
    pub mirostat_tau: f64,
    pub temperature: f64,
    pub repeat_penalty: f64,
    pub top_k: u32,
    pub top_p: f64,
}

impl ModelOptions {
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            num_ctx: config.context_size,
            num_predict: config.max_tokens.to_sentinel(),
            mirostat: config.mirostat.as_u8(),
            mirostat_eta: config.mirostat_eta,
            mirostat_tau: config.mirostat_tau,
            temperature: config.temperature,
            repeat_penalty: config.repeat_penalty,
            top_k: config.top_k,
            top_p: config.top_p,
        }
    }
}

/// Body of a non-streaming generate response. Everything is optional on
/// the wire; what the completion pipeline requires is checked by the
/// caller so the error can say what was missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
}

/// Body of `GET /api/tags`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelTag {
    pub name: String,
}
