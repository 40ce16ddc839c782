//! Anthropic Messages API client.

use super::{http_client, non_empty, post_json, Prompt, Provider, ProviderError};
use crate::config::ProviderSettings;
use async_trait::async_trait;
use facsimile::ProviderErrorKind;
use serde_json::json;
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    identity: String,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            identity: format!("anthropic:{}", settings.model),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.clone(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": prompt.params.max_tokens,
            "temperature": prompt.params.temperature,
            "system": prompt.system,
            "messages": [{"role": "user", "content": prompt.user}],
        });
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION);
        let response = post_json(request, &body).await?;

        let parts = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::Decode, "response has no content"))?;
        let text: String = parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        non_empty(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use facsimile::GenerationParams;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicProvider {
        let settings = ProviderSettings {
            kind: ProviderKind::Anthropic,
            api_key: "test-key".into(),
            model: "claude-test".into(),
            base_url: server.uri(),
        };
        AnthropicProvider::new(&settings, Duration::from_secs(5))
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "be faithful".into(),
            user: "clone this".into(),
            params: GenerationParams {
                temperature: 0.2,
                max_tokens: 1024,
                seed: None,
            },
        }
    }

    #[tokio::test]
    async fn test_invoke_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({"model": "claude-test", "system": "be faithful"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "<html>"},
                    {"type": "text", "text": "</html>"}
                ]
            })))
            .mount(&server)
            .await;
        let out = provider(&server).invoke(&prompt()).await.unwrap();
        assert_eq!(out, "<html></html>");
    }

    #[tokio::test]
    async fn test_rate_limit_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        let err = provider(&server).invoke(&prompt()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::RateLimited);
        assert!(err.message.contains("slow down"));
    }

    #[tokio::test]
    async fn test_empty_content_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": []})))
            .mount(&server)
            .await;
        let err = provider(&server).invoke(&prompt()).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::EmptyResponse);
    }
}
