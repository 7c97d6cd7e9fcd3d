//! Language model collaborator
//!
//! The core only needs `complete(prompt) -> text`. [`LlmClient`] implements it
//! against an OpenAI-compatible `/chat/completions` endpoint.

use crate::config::LlmSettings;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_MESSAGE: &str =
    "You are a careful data assistant. Follow the output format requested in each prompt exactly.";

/// Text completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.1,
            client,
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| AgentError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(
            api_key,
            settings.model.clone(),
            settings.base_url.clone(),
            settings.timeout,
        )
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt}
            ],
        });

        // Reasoning models reject temperature
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3") {
            body["max_completion_tokens"] = serde_json::json!(4000);
        } else if self.model.starts_with("gpt-4") {
            body["temperature"] = serde_json::json!(self.temperature);
            body["max_completion_tokens"] = serde_json::json!(1500);
        } else {
            body["temperature"] = serde_json::json!(self.temperature);
            body["max_tokens"] = serde_json::json!(1500);
        }

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling LLM");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Llm(format!("LLM API call timed out: {}", e))
                } else {
                    AgentError::Llm(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(AgentError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| {
                AgentError::Llm(format!("No choices in LLM response: {}", response_json))
            })?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(AgentError::Llm(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }

        let content = choice["message"]["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AgentError::Llm("Empty content in LLM response".to_string()));
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.call_llm(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, model: &str) -> LlmClient {
        LlmClient::new(
            "test-key".to_string(),
            model.to_string(),
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "SELECT 1;"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let llm = client_for(&server, "gpt-4o-mini");
        assert_eq!(llm.complete("prompt").await.unwrap(), "SELECT 1;");
    }

    #[tokio::test]
    async fn test_http_error_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server, "gpt-4o-mini").complete("p").await.unwrap_err();
        match err {
            AgentError::Llm(msg) => assert!(msg.contains("upstream down")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_content_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  "}}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, "gpt-4o-mini").complete("p").await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let llm = LlmClient::new(
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            server.uri(),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = llm.complete("p").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_from_settings_requires_api_key() {
        let settings = crate::config::AgentConfig::default().llm;
        assert!(matches!(
            LlmClient::from_settings(&settings),
            Err(AgentError::Config(_))
        ));
    }
}
