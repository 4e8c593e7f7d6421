//! Executes one test against one slot
//!
//! A [`TestRunner`] posts the invocation to the chat endpoint through a
//! [`ChatTransport`], feeds the streamed body through a [`StreamDecoder`] and
//! drives the slot's [`RunState`](crate::run_state::RunState) to a terminal
//! state.

use crate::backend::ChatRequest;
use crate::observer::{MessageKind, RunObserver};
use crate::run_state::{RunState, RunStatus};
use crate::slot::{ModelSlot, RunGuard};
use crate::stream::{Framing, StreamDecoder, StreamEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default address of the relay server
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

/// Errors opening or reading a chat stream
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Body chunks in arrival order
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Opens the streamed response for a chat request
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError>;
}

/// [`ChatTransport`] over HTTP to the relay server's `/api/chat`
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self::with_client(Client::builder().build()?, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        Ok(response.bytes_stream().map_err(TransportError::from).boxed())
    }
}

/// The prompt shared by every runner in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInvocation {
    pub input: String,
    pub title: String,
}

impl TestInvocation {
    pub fn new(input: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            title: title.into(),
        }
    }
}

/// Why a run ended in `Failed`
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("run cancelled")]
    Cancelled,
}

/// Result of [`TestRunner::run`]
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The slot already had a run in flight; nothing was started
    Skipped,
    /// The run reached this terminal state
    Finished(RunState),
}

impl RunOutcome {
    pub fn state(&self) -> Option<&RunState> {
        match self {
            RunOutcome::Skipped => None,
            RunOutcome::Finished(state) => Some(state),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }
}

/// Runs a test invocation against a single slot
#[derive(Clone)]
pub struct TestRunner {
    transport: Arc<dyn ChatTransport>,
    framing: Framing,
}

impl TestRunner {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            framing: Framing::default(),
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Run `invocation` on `slot`.
    ///
    /// A slot that is already running is left alone and
    /// [`RunOutcome::Skipped`] is returned. Otherwise the slot gets a fresh
    /// running state which ends completed or failed; transport errors never
    /// escape this call.
    pub async fn run(
        &self,
        slot: &ModelSlot,
        invocation: &TestInvocation,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let Some(guard) = slot.try_begin() else {
            debug!(slot = %slot.id(), "Slot already running, skipping");
            return RunOutcome::Skipped;
        };

        let id = slot.id();
        observer.on_status(id, RunStatus::Running);
        if !invocation.title.is_empty() {
            observer.on_title(id, &format!("Current test: {}", invocation.title));
            observer.on_message(id, MessageKind::Title, &invocation.title);
        }
        observer.on_message(id, MessageKind::Input, &invocation.input);
        observer.on_metrics(id, "Processing...");

        info!(slot = %id, backend = %slot.config(), "Starting test run");

        match self.consume(&guard, invocation, observer, cancel).await {
            Ok(skipped_fragments) => {
                let state = guard.complete();
                let elapsed_ms = state.elapsed().map(|d| d.as_millis()).unwrap_or_default();
                info!(
                    slot = %id,
                    elapsed_ms,
                    chars = state.accumulated_text().chars().count(),
                    skipped_fragments,
                    "Test run completed"
                );
                observer.on_metrics(id, &format!("Elapsed: {}ms", elapsed_ms));
                observer.on_status(id, RunStatus::Completed);
                RunOutcome::Finished(state)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(slot = %id, error = %message, "Test run failed");
                observer.on_message(id, MessageKind::Error, &message);
                observer.on_metrics(id, "Failed");
                let state = guard.fail(message);
                observer.on_status(id, RunStatus::Failed);
                RunOutcome::Finished(state)
            }
        }
    }

    /// Stream the response into the guarded state, returning how many
    /// fragments the decoder skipped
    async fn consume(
        &self,
        guard: &RunGuard<'_>,
        invocation: &TestInvocation,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> Result<usize, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let request = ChatRequest {
            input: invocation.input.clone(),
            config: guard.slot().config().clone(),
        };

        let mut body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            opened = self.transport.open(&request) => opened?,
        };

        let mut decoder = StreamDecoder::new(self.framing);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                next = body.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };

            for event in decoder.feed(&chunk?) {
                Self::apply(guard, event, observer);
            }
        }

        for event in decoder.finish() {
            Self::apply(guard, event, observer);
        }

        Ok(decoder.warnings())
    }

    fn apply(guard: &RunGuard<'_>, event: StreamEvent, observer: &dyn RunObserver) {
        let id = guard.slot().id();

        if let Some(error) = event.error {
            warn!(slot = %id, error = %error, "Backend reported an error");
            observer.on_message(id, MessageKind::Error, &error);
        }

        if let Some(text) = event.text {
            let accumulated = guard.append(&text);
            observer.on_output(id, &accumulated);
        }
    }
}
