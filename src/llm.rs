//! Completion model abstraction and implementations.
//!
//! The rest of the crate sees the language model as one fallible call:
//! [`CompletionModel::complete`]. Concrete providers:
//!
//! - **[`DisabledModel`]**: always fails; used when no provider is configured.
//! - **[`GeminiModel`]**: Google Generative Language `generateContent`.
//! - **[`OpenAIModel`]**: OpenAI-compatible `/v1/chat/completions`.
//! - **[`OllamaModel`]**: local Ollama `/api/generate`.
//!
//! [`create_model`] picks one from `[model]` configuration and wraps it in
//! [`TimedModel`] so no completion can hang a turn.
//!
//! No provider retries. A failed call surfaces to the user for that turn
//! only; asking again is the retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{with_deadline, HubError, Result};

/// A text-completion backend.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Model identifier (e.g. `"gemini-2.0-flash"`).
    fn model_name(&self) -> &str;

    /// Complete `prompt`, returning the raw model text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the configured provider, wrapped with the configured deadline.
///
/// # Errors
///
/// Fails for unknown providers, a missing `model.model`, or a missing API
/// key environment variable.
pub fn create_model(config: &ModelConfig) -> anyhow::Result<Arc<dyn CompletionModel>> {
    let inner: Arc<dyn CompletionModel> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledModel),
        "gemini" => Arc::new(GeminiModel::new(config)?),
        "openai" => Arc::new(OpenAIModel::new(config)?),
        "ollama" => Arc::new(OllamaModel::new(config)?),
        other => bail!("Unknown model provider: {}", other),
    };
    Ok(Arc::new(TimedModel::new(
        inner,
        Duration::from_secs(config.timeout_secs),
    )))
}

// ============ Timed wrapper ============

/// Bounds every completion with a deadline.
pub struct TimedModel {
    inner: Arc<dyn CompletionModel>,
    limit: Duration,
}

impl TimedModel {
    pub fn new(inner: Arc<dyn CompletionModel>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl CompletionModel for TimedModel {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        with_deadline("model completion", self.limit, self.inner.complete(prompt)).await
    }
}

// ============ Disabled ============

/// A provider that refuses every request.
pub struct DisabledModel;

#[async_trait]
impl CompletionModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(HubError::ModelUnavailable(
            "model provider is disabled".to_string(),
        ))
    }
}

// ============ Shared HTTP plumbing ============

fn required_model(config: &ModelConfig, provider: &str) -> anyhow::Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("model.model required for {} provider", provider))
}

fn api_key(config: &ModelConfig, default_env: &str) -> anyhow::Result<String> {
    let var = config.api_key_env.as_deref().unwrap_or(default_env);
    match std::env::var(var) {
        Ok(k) if !k.trim().is_empty() => Ok(k),
        _ => bail!("{} environment variable not set", var),
    }
}

fn http_client(config: &ModelConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Send a JSON request and return the decoded JSON body.
async fn send_json(req: reqwest::RequestBuilder, provider: &str, timeout_secs: u64) -> Result<Value> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            HubError::Timeout {
                operation: format!("{} completion", provider),
                secs: timeout_secs,
            }
        } else {
            HubError::ModelUnavailable(format!("{}: {}", provider, e))
        }
    })?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(300).collect();
        return Err(HubError::ModelUnavailable(format!(
            "{} API error {}: {}",
            provider, status, body
        )));
    }
    resp.json()
        .await
        .map_err(|e| HubError::ModelUnavailable(format!("{}: invalid response body: {}", provider, e)))
}

// ============ Gemini ============

/// Google Gemini via the Generative Language API.
///
/// API key from `GEMINI_API_KEY` unless `model.api_key_env` says otherwise.
pub struct GeminiModel {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl GeminiModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: required_model(config, "gemini")?,
            api_key: api_key(config, "GEMINI_API_KEY")?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let model = self.model.trim_start_matches("models/");
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        let req = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let json = send_json(req, "gemini", self.timeout_secs).await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
pub fn parse_gemini_response(json: &Value) -> Result<String> {
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            let reason = json["promptFeedback"]["blockReason"]
                .as_str()
                .unwrap_or("no candidates returned");
            HubError::ModelUnavailable(format!("gemini: {}", reason))
        })?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        return Err(HubError::ModelUnavailable("gemini: empty completion".into()));
    }
    Ok(text)
}

// ============ OpenAI ============

/// OpenAI (or compatible) chat completions.
///
/// API key from `OPENAI_API_KEY` unless `model.api_key_env` says otherwise.
pub struct OpenAIModel {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAIModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: required_model(config, "openai")?,
            api_key: api_key(config, "OPENAI_API_KEY")?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let req = self.client.post(url).bearer_auth(&self.api_key).json(&body);
        let json = send_json(req, "openai", self.timeout_secs).await?;
        parse_openai_response(&json)
    }
}

pub fn parse_openai_response(json: &Value) -> Result<String> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HubError::ModelUnavailable("openai: missing choices[0].message.content".into()))
}

// ============ Ollama ============

/// A local Ollama server. No API key.
pub struct OllamaModel {
    client: reqwest::Client,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl OllamaModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            model: required_model(config, "ollama")?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "prompt": prompt, "stream": false });
        let json = send_json(self.client.post(url).json(&body), "ollama", self.timeout_secs).await?;
        json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HubError::ModelUnavailable("ollama: missing response field".into()))
    }
}
