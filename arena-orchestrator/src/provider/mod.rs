//! Upstream chat providers behind the relay server
//!
//! Each provider turns one prompt into a stream of [`StreamEvent`]s. Upstream
//! failures do not fail the HTTP response; they arrive as an `error` event,
//! which is what chat clients expect to read.

mod deepseek;
mod ollama;
mod vllm;

pub use deepseek::DeepSeekProvider;
pub use ollama::{OllamaProvider, RepeatGuard, RepeatVerdict};
pub use vllm::VllmProvider;

use crate::backend::BackendConfig;
use crate::stream::StreamEvent;
use crate::ArenaConfig;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Errors that can occur when relaying to an upstream provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Cannot connect to {service}: {message}")]
    ConnectionError { service: &'static str, message: String },

    #[error("{service} API call failed: HTTP {status}{detail}")]
    StatusError {
        service: &'static str,
        status: u16,
        /// Empty, or ` - <upstream message>`
        detail: String,
    },

    #[error("{0}")]
    InvalidKey(String),

    #[error("{0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub(crate) fn connection(service: &'static str, err: impl std::fmt::Display) -> Self {
        ProviderError::ConnectionError {
            service,
            message: err.to_string(),
        }
    }

    pub(crate) fn status(service: &'static str, status: u16, message: Option<String>) -> Self {
        ProviderError::StatusError {
            service,
            status,
            detail: message.map(|m| format!(" - {}", m)).unwrap_or_default(),
        }
    }
}

/// Events produced for one chat request
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Trait for upstream chat providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Get the provider name for logging/identification
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;

    /// Start relaying `input` upstream
    async fn stream(&self, input: &str) -> EventStream;
}

/// Sending half handed to a relay task
#[derive(Clone)]
pub struct EventSender(mpsc::Sender<StreamEvent>);

impl EventSender {
    /// Forward an event; `false` once the client has gone away
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.0.send(event).await.is_ok()
    }

    pub async fn text(&self, text: impl Into<String>) -> bool {
        self.send(StreamEvent::text(text)).await
    }
}

/// Run `relay` on its own task and expose what it sends as a stream.
///
/// An `Err` from the relay becomes a final `error` event.
pub(crate) fn spawn_relay<F, Fut>(service: &'static str, relay: F) -> EventStream
where
    F: FnOnce(EventSender) -> Fut,
    Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let task = relay(EventSender(tx.clone()));

    tokio::spawn(async move {
        if let Err(e) = task.await {
            warn!(provider = service, error = %e, "Relay failed");
            let _ = tx.send(StreamEvent::error(e.to_string())).await;
        }
    });

    ReceiverStream::new(rx).boxed()
}

/// Pull a human-readable message out of an upstream error body
pub(crate) fn error_detail(body: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(serde_json::Value::Object(obj.clone()).to_string())),
        other => Some(other.to_string()),
    }
}

/// Build the provider that serves `config`
pub fn provider_for(
    config: &BackendConfig,
    settings: &ArenaConfig,
    client: Client,
) -> Box<dyn ChatProvider> {
    match config {
        BackendConfig::Ollama { model } => {
            Box::new(OllamaProvider::new(client, &settings.ollama, model.clone()))
        }
        BackendConfig::Vllm { model, host, port } => {
            Box::new(VllmProvider::from_slot(client, settings.vllm.as_ref(), model, host, port))
        }
        BackendConfig::DeepSeek { model, api_key } => Box::new(DeepSeekProvider::new(
            client,
            settings.deepseek.clone().unwrap_or_default(),
            api_key.clone(),
            model.clone(),
        )),
    }
}
