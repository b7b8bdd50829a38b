use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::AiConfig;

const ENDPOINT_CHAT: &str = "/chat/completions";
const TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 500;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned no completion")]
    EmptyCompletion,
}

/// A chat model answering one system + user prompt pair.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// DeepSeek chat completions (OpenAI-compatible, bearer auth).
pub struct DeepSeekClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl DeepSeekClient {
    pub fn new(config: &AiConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for DeepSeekClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!("🧠 Calling chat completions: model={}", self.model);

        let response = self
            .http_client
            .post(format!("{}{}", self.base_url, ENDPOINT_CHAT))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(url: &str) -> DeepSeekClient {
        DeepSeekClient::new(&AiConfig {
            api_key: "sk-test".to_string(),
            base_url: url.to_string(),
            model: "deepseek-chat".to_string(),
        })
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJsonString(
                r#"{"model":"deepseek-chat","max_tokens":500}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"decision\":\"WAIT\"}"}}]}"#)
            .create_async()
            .await;

        let reply = client(&server.url()).complete("sys", "user").await.unwrap();
        assert_eq!(reply, r#"{"decision":"WAIT"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(402)
            .with_body("Insufficient Balance")
            .create_async()
            .await;

        let err = client(&server.url()).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, ModelError::Api { status: 402, .. }));
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = client(&server.url()).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, ModelError::EmptyCompletion));
    }
}
