//! VLLM provider: OpenAI-compatible streaming chat completions over SSE

use super::{error_detail, spawn_relay, ChatProvider, EventSender, EventStream, ProviderError};
use crate::stream::LineDecoder;
use crate::VllmConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const SERVICE: &str = "VLLM";
const CONNECT_SERVICE: &str = "VLLM service";

/// Provider for a VLLM server
#[derive(Clone)]
pub struct VllmProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl VllmProvider {
    pub fn new(client: Client, host: &str, port: &str, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: format!("http://{}:{}", host, port),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    /// Build from a slot's fields, filling blanks from the server's `[vllm]`
    /// section
    pub fn from_slot(
        client: Client,
        defaults: Option<&VllmConfig>,
        model: &str,
        host: &str,
        port: &str,
    ) -> Self {
        let pick = |value: &str, fallback: Option<&String>| {
            if value.is_empty() {
                fallback.cloned().unwrap_or_default()
            } else {
                value.to_string()
            }
        };

        let host = pick(host, defaults.map(|d| &d.host));
        let port = pick(port, defaults.map(|d| &d.port));
        let model = pick(model, defaults.map(|d| &d.model));

        let mut provider = Self::new(client, &host, &port, model);
        if let Some(defaults) = defaults {
            provider.temperature = defaults.temperature;
            provider.max_tokens = defaults.max_tokens;
        }
        provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn relay(self, input: String, tx: EventSender) -> Result<(), ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatRequest {
            model: (!self.model.is_empty()).then(|| self.model.clone()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: input,
            }],
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::connection(CONNECT_SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::status(SERVICE, status, error_detail(&body, "error")));
        }

        let mut body = response.bytes_stream();
        let mut lines = LineDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ProviderError::connection(CONNECT_SERVICE, e))?;
            for line in lines.feed(&chunk) {
                if let Some(content) = delta_content(&line) {
                    if !tx.text(content).await {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(content) = lines.finish().as_deref().and_then(delta_content) {
            tx.text(content).await;
        }

        debug!(base_url = %self.base_url, "VLLM stream finished");
        Ok(())
    }
}

#[async_trait]
impl ChatProvider for VllmProvider {
    fn name(&self) -> &str {
        "vllm"
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

/// Text carried by one SSE line, if any.
///
/// `[DONE]`, comments and malformed payloads yield `None`.
fn delta_content(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data: ")?;
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            trace!(error = %e, "Skipping SSE payload");
            return None;
        }
    };
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
}

#[derive(Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
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

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}
