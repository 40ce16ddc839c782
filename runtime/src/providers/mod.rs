//! Generation providers behind one `invoke` capability.
//!
//! Each backend is a [`Provider`] that turns a [`Prompt`] into raw text.
//! Retries, backoff and escalation live in the orchestrator; a provider
//! makes exactly one HTTP call per `invoke`.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::config::{ProviderKind, ProviderSettings};
use async_trait::async_trait;
use facsimile::{GenerationParams, ProviderErrorKind};
use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// One provider call: system instructions, user message, sampling params.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub params: GenerationParams,
}

/// A failed provider call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ProviderErrorKind::Timeout
        } else if e.is_decode() {
            ProviderErrorKind::Decode
        } else if let Some(status) = e.status() {
            ProviderErrorKind::from_status(status.as_u16())
        } else {
            ProviderErrorKind::Network
        };
        Self::new(kind, e.to_string())
    }
}

/// A generative backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used in logs and results, e.g. `anthropic:claude-3-5-sonnet`.
    fn identity(&self) -> &str;

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// Build clients for the configured providers, in priority order.
pub fn build_providers(settings: &[ProviderSettings], timeout: Duration) -> Vec<Arc<dyn Provider>> {
    settings
        .iter()
        .map(|s| -> Arc<dyn Provider> {
            match s.kind {
                ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(s, timeout)),
                ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(s, timeout)),
                ProviderKind::Gemini => Arc::new(GeminiProvider::new(s, timeout)),
            }
        })
        .collect()
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Send a JSON POST and decode a JSON response, mapping failures to
/// [`ProviderError`]. Error bodies are kept (truncated) in the message.
pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(ProviderError::from_reqwest)?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(500).collect();
        return Err(ProviderError::new(
            ProviderErrorKind::from_status(status.as_u16()),
            format!("HTTP {}: {snippet}", status.as_u16()),
        ));
    }
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProviderError::new(ProviderErrorKind::Decode, e.to_string()))
}

/// Reject empty output.
pub(crate) fn non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::new(
            ProviderErrorKind::EmptyResponse,
            "provider returned no text",
        ))
    } else {
        Ok(text)
    }
}
