//! DeepSeek API provider implementation
//!
//! DeepSeek is called without streaming; the finished answer is replayed one
//! character per event so clients render it the same way as local models.

use super::{error_detail, spawn_relay, ChatProvider, EventSender, EventStream, ProviderError};
use crate::DeepSeekConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "DeepSeek";
const CONNECT_SERVICE: &str = "DeepSeek API";

const KEY_PREFIX: &str = "sk-";

/// DeepSeek API provider
#[derive(Clone)]
pub struct DeepSeekProvider {
    client: Client,
    settings: DeepSeekConfig,
    api_key: String,
    model: String,
}

impl DeepSeekProvider {
    /// `model` falls back to the configured model when empty
    pub fn new(
        client: Client,
        settings: DeepSeekConfig,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let model = if model.is_empty() {
            settings.model.clone()
        } else {
            model
        };
        Self {
            client,
            settings,
            api_key: api_key.into(),
            model,
        }
    }

    async fn relay(self, input: String, tx: EventSender) -> Result<(), ProviderError> {
        if !self.api_key.starts_with(KEY_PREFIX) {
            return Err(ProviderError::InvalidKey(format!(
                "DeepSeek API key format is invalid, it should start with {}",
                KEY_PREFIX
            )));
        }

        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: input,
            }],
            stream: false,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        info!(model = %self.model, "Calling DeepSeek API");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::connection(CONNECT_SERVICE, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::InvalidKey(
                "DeepSeek API key is invalid. Set a valid api_key in the [deepseek] section of \
                 config.toml; keys are issued at https://platform.deepseek.com/"
                    .to_string(),
            ));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::status(SERVICE, status, error_detail(&body, "message")));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("DeepSeek returned an invalid response".to_string())
            })?;

        debug!(chars = content.chars().count(), "DeepSeek response received");

        let delay = Duration::from_millis(self.settings.replay_delay_ms);
        for ch in content.chars() {
            if !tx.text(ch).await {
                return Ok(());
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChatProvider for DeepSeekProvider {
    fn name(&self) -> &str {
        "deepseek"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, input: &str) -> EventStream {
        let this = self.clone();
        let input = input.to_string();
        spawn_relay(CONNECT_SERVICE, move |tx| this.relay(input, tx))
    }
}

/// OpenAI-compatible chat request
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// OpenAI-compatible chat response
#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}
