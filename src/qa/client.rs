use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::prompt;
use crate::config::QaConfig;
use crate::error::RunnerError;

/// Errors from the chat-completions API. Each one fails a single record.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Cannot connect to chat API at {0}: {1}")]
    Connection(String, String),

    #[error("Rate limited by chat API: {0}")]
    RateLimited(String),

    #[error("Chat API returned HTTP {0}: {1}")]
    Api(u16, String),

    #[error("Invalid response from chat API: {0}")]
    InvalidResponse(String),

    #[error("Chat API returned an empty completion")]
    EmptyResponse,
}

/// Anything that can answer the fixed questions for a caption.
pub trait CaptionAnswerer: Send + Sync {
    /// Ordered answer lines for `caption`.
    fn answer(&self, caption: &str) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;

    /// Model name, used as the ETA resource key.
    fn model(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Minimal client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl ChatClient {
    /// Build a client from config. Fails if no API key is set.
    pub fn from_config(config: &QaConfig) -> crate::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RunnerError::MissingCredential(format!(
                    "OpenAI API key is required. Set {}.",
                    crate::config::API_KEY_ENV
                ))
            })?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RunnerError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Send one system + user exchange and return the trimmed completion text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, ApiError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.max_tokens,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }

        let url = format!("{}/chat/completions", self.api_base);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Connection(url.clone(), e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::RateLimited(text));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Api(status.as_u16(), text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        Ok(content)
    }
}

impl CaptionAnswerer for ChatClient {
    async fn answer(&self, caption: &str) -> Result<Vec<String>, ApiError> {
        let content = self
            .chat(prompt::SYSTEM_PROMPT, &prompt::user_prompt(caption))
            .await?;
        Ok(prompt::split_answers(&content))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ChatClient {
        let config = QaConfig {
            api_base: server.uri(),
            api_key: Some("sk-test".to_string()),
            ..QaConfig::default()
        };
        ChatClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let result = ChatClient::from_config(&QaConfig::default());
        assert!(matches!(result, Err(RunnerError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn test_answer_splits_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "A1: Echo\n\nA2: Heart\n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let answers = client.answer("Parasternal long axis").await.unwrap();
        assert_eq!(answers, vec!["A1: Echo", "A2: Heart"]);
        assert_eq!(client.model(), "gpt-4");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client_for(&server).answer("x").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited(ref body) if body == "slow down"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).answer("x").await.unwrap_err();
        assert!(matches!(err, ApiError::Api(500, _)));
    }

    #[tokio::test]
    async fn test_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).answer("x").await.unwrap_err();
        assert!(matches!(err, ApiError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).answer("x").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }
}
