//! OpenAI Chat Completions client.

use super::{http_client, non_empty, post_json, Prompt, Provider, ProviderError};
use crate::config::ProviderSettings;
use async_trait::async_trait;
use facsimile::ProviderErrorKind;
use serde_json::json;
use std::time::Duration;

pub struct OpenAiProvider {
    client: reqwest::Client,
    identity: String,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            identity: format!("openai:{}", settings.model),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "temperature": prompt.params.temperature,
            "max_tokens": prompt.params.max_tokens,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });
        if let Some(seed) = prompt.params.seed {
            body["seed"] = json!(seed);
        }
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let response = post_json(request, &body).await?;

        let text = response
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::Decode, "response has no message content"))?;
        non_empty(text.to_string())
    }
}
