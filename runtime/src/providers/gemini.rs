//! Google Gemini `generateContent` client.

use super::{http_client, non_empty, post_json, Prompt, Provider, ProviderError};
use crate::config::ProviderSettings;
use async_trait::async_trait;
use facsimile::ProviderErrorKind;
use serde_json::json;
use std::time::Duration;

pub struct GeminiProvider {
    client: reqwest::Client,
    identity: String,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            identity: format!("gemini:{}", settings.model),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let mut generation = json!({
            "temperature": prompt.params.temperature,
            "maxOutputTokens": prompt.params.max_tokens,
        });
        if let Some(seed) = prompt.params.seed {
            generation["seed"] = json!(seed);
        }
        let body = json!({
            "systemInstruction": {"parts": [{"text": prompt.system}]},
            "contents": [{"role": "user", "parts": [{"text": prompt.user}]}],
            "generationConfig": generation,
        });
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key);
        let response = post_json(request, &body).await?;

        let parts = response
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| {
                let reason = response
                    .pointer("/promptFeedback/blockReason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("no candidates");
                ProviderError::new(ProviderErrorKind::EmptyResponse, reason)
            })?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        non_empty(text)
    }
}
