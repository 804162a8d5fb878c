use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to completion endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("completion API returned no content")]
    EmptyResponse,
}

/// Anything that turns a prompt into a single text completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// `sender` is the display name or id of whoever wrote the prompt.
    async fn complete(&self, prompt: &str, sender: Option<&str>) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn build_messages(&self, prompt: &str, sender: Option<&str>) -> Vec<ChatMessage> {
        let mut system = self.config.system_prompt.clone();
        if let Some(sender) = sender {
            system.push_str(&format!("\n\nYou are chatting on WhatsApp with {}.", sender));
        }
        vec![ChatMessage::system(system), ChatMessage::user(prompt)]
    }

    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatMessage, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.effective_base_url());

        debug!("Sending request to {} ({})", self.config.provider, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str, sender: Option<&str>) -> Result<String, LlmError> {
        let reply = self.chat(self.build_messages(prompt, sender)).await?;
        reply
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}
