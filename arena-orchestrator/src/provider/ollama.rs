//! Ollama provider: streams `/api/generate` and lists installed models

use super::{error_detail, spawn_relay, ChatProvider, EventSender, EventStream, ProviderError};
use crate::stream::LineDecoder;
use crate::OllamaConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const SERVICE: &str = "Ollama";
const CONNECT_SERVICE: &str = "Ollama service";

/// Appended when a formatted answer starts repeating
pub const END_NOTICE: &str = "\n[output ended]";

/// Provider for a local or remote Ollama server
#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    name: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaProvider {
    pub fn new(client: Client, config: &OllamaConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            name: format!("ollama:{}", model),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Names of the models installed on the server
    pub async fn list_models(client: &Client, base_url: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", base_url.trim_end_matches('/'));

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::connection(CONNECT_SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::status(SERVICE, status, error_detail(&body, "error")));
        }

        let tags: OllamaTagsResponse = response.json().await?;
        Ok(tags
            .models
            .into_iter()
            .filter_map(|m| m.model.or(m.name))
            .collect())
    }

    async fn relay(self, input: String, tx: EventSender) -> Result<(), ProviderError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: input,
            stream: true,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
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
        let mut guard = RepeatGuard::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ProviderError::connection(CONNECT_SERVICE, e))?;
            for line in lines.feed(&chunk) {
                if !self.forward(&line, &mut guard, &tx).await {
                    return Ok(());
                }
            }
        }

        if let Some(line) = lines.finish() {
            self.forward(&line, &mut guard, &tx).await;
        }

        debug!(model = %self.model, "Ollama stream finished");
        Ok(())
    }

    /// Forward one NDJSON line; `false` means stop reading
    async fn forward(&self, line: &str, guard: &mut RepeatGuard, tx: &EventSender) -> bool {
        if line.trim().is_empty() {
            return true;
        }

        let chunk: OllamaChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(model = %self.model, error = %e, "Skipping unparseable Ollama line");
                return true;
            }
        };

        let Some(response) = chunk.response.filter(|r| !r.is_empty()) else {
            return true;
        };

        match guard.observe(&response) {
            RepeatVerdict::Emit => tx.text(response).await,
            RepeatVerdict::StopWithNotice => {
                info!(model = %self.model, "Formatted output repeating, stopping generation");
                tx.text(END_NOTICE).await;
                false
            }
            RepeatVerdict::Stop => {
                info!(model = %self.model, "Long output repeating, stopping generation");
                false
            }
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
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

/// What to do with a fragment after repeat detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatVerdict {
    Emit,
    /// Repeating formatted answer: emit [`END_NOTICE`] and stop
    StopWithNotice,
    /// Repeating long text: stop without notice
    Stop,
}

/// Detects models stuck emitting the same fragment over and over
#[derive(Debug, Default)]
pub struct RepeatGuard {
    recent: VecDeque<String>,
}

impl RepeatGuard {
    const HISTORY: usize = 5;
    const LONG_FRAGMENT: usize = 10;
    const FORMAT_MARKERS: [&'static str; 4] = ["\\boxed", "$", "```", "**答案**"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, fragment: &str) -> RepeatVerdict {
        self.recent.push_back(fragment.to_string());
        if self.recent.len() > Self::HISTORY {
            self.recent.pop_front();
        }

        let n = self.recent.len();
        if n < 2 {
            return RepeatVerdict::Emit;
        }

        let previous = self.recent[n - 2].trim();
        let current = self.recent[n - 1].trim();
        if current.is_empty() || previous != current {
            return RepeatVerdict::Emit;
        }

        if Self::FORMAT_MARKERS.iter().any(|m| fragment.contains(m)) {
            RepeatVerdict::StopWithNotice
        } else if current.chars().count() > Self::LONG_FRAGMENT {
            RepeatVerdict::Stop
        } else {
            RepeatVerdict::Emit
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}
