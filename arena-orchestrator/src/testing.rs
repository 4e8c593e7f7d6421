//! Test doubles for the transport and observer seams

use crate::backend::ChatRequest;
use crate::observer::{MessageKind, RunObserver};
use crate::run_state::RunStatus;
use crate::runner::{ChatTransport, ChunkStream, TransportError};
use crate::slot::SlotId;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What the scripted backend does for one model
#[derive(Debug, Clone)]
pub enum Script {
    FailOpen(String),
    Stream {
        chunks: Vec<Vec<u8>>,
        tail: Tail,
    },
}

#[derive(Debug, Clone)]
pub enum Tail {
    End,
    Fail(String),
    Hang,
}

impl Script {
    pub fn chunks<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Self {
        Script::Stream {
            chunks: chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect(),
            tail: Tail::End,
        }
    }

    pub fn raw(chunks: Vec<Vec<u8>>) -> Self {
        Script::Stream {
            chunks,
            tail: Tail::End,
        }
    }

    pub fn empty() -> Self {
        Self::raw(Vec::new())
    }

    pub fn fail_open(message: &str) -> Self {
        Script::FailOpen(message.to_string())
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.with_tail(Tail::Fail(message.to_string()))
    }

    pub fn then_hang(self) -> Self {
        self.with_tail(Tail::Hang)
    }

    fn with_tail(self, tail: Tail) -> Self {
        match self {
            Script::Stream { chunks, .. } => Script::Stream { chunks, tail },
            other => other,
        }
    }
}

/// Shared, ordered record of what happened across transport and observer
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Transport that answers from per-model scripts.
///
/// Every chunk is delivered after a yield so concurrent runs interleave.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    opened: Arc<AtomicUsize>,
    log: EventLog,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model: &str, script: Script) -> Self {
        self.scripts.insert(model.to_string(), script);
        self
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let model = request.config.model().to_string();
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("open {}", model));

        let script = self
            .scripts
            .get(&model)
            .cloned()
            .unwrap_or_else(Script::empty);

        let (chunks, tail) = match script {
            Script::FailOpen(message) => return Err(TransportError::Connection(message)),
            Script::Stream { chunks, tail } => (chunks, tail),
        };

        let body = stream::iter(chunks).then(|chunk| async move {
            tokio::task::yield_now().await;
            Ok::<_, TransportError>(Bytes::from(chunk))
        });

        let tail = match tail {
            Tail::End => stream::empty::<Result<Bytes, TransportError>>().boxed(),
            Tail::Fail(message) => {
                stream::once(async move { Err(TransportError::Connection(message)) }).boxed()
            }
            Tail::Hang => stream::pending::<Result<Bytes, TransportError>>().boxed(),
        };

        Ok(body.chain(tail).boxed())
    }
}

/// Observer that records every callback per slot
#[derive(Default)]
pub struct RecordingObserver {
    groups: Mutex<Vec<(usize, Vec<SlotId>)>>,
    titles: Mutex<HashMap<SlotId, Vec<String>>>,
    messages: Mutex<HashMap<SlotId, Vec<(MessageKind, String)>>>,
    outputs: Mutex<HashMap<SlotId, Vec<String>>>,
    metrics: Mutex<HashMap<SlotId, Vec<String>>>,
    statuses: Mutex<HashMap<SlotId, Vec<RunStatus>>>,
    log: EventLog,
}

impl RecordingObserver {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn groups(&self) -> Vec<(usize, Vec<SlotId>)> {
        self.groups.lock().clone()
    }

    pub fn titles(&self, slot: SlotId) -> Vec<String> {
        self.titles.lock().get(&slot).cloned().unwrap_or_default()
    }

    pub fn messages(&self, slot: SlotId) -> Vec<(MessageKind, String)> {
        self.messages.lock().get(&slot).cloned().unwrap_or_default()
    }

    pub fn outputs(&self, slot: SlotId) -> Vec<String> {
        self.outputs.lock().get(&slot).cloned().unwrap_or_default()
    }

    pub fn metrics(&self, slot: SlotId) -> Vec<String> {
        self.metrics.lock().get(&slot).cloned().unwrap_or_default()
    }

    pub fn statuses(&self, slot: SlotId) -> Vec<RunStatus> {
        self.statuses.lock().get(&slot).cloned().unwrap_or_default()
    }
}

impl RunObserver for RecordingObserver {
    fn on_group(&self, group: usize, slots: &[(SlotId, crate::backend::BackendConfig)]) {
        self.groups
            .lock()
            .push((group, slots.iter().map(|(id, _)| *id).collect()));
    }

    fn on_title(&self, slot: SlotId, title: &str) {
        self.titles.lock().entry(slot).or_default().push(title.to_string());
    }

    fn on_message(&self, slot: SlotId, kind: MessageKind, content: &str) {
        self.messages
            .lock()
            .entry(slot)
            .or_default()
            .push((kind, content.to_string()));
    }

    fn on_output(&self, slot: SlotId, accumulated: &str) {
        self.outputs
            .lock()
            .entry(slot)
            .or_default()
            .push(accumulated.to_string());
    }

    fn on_metrics(&self, slot: SlotId, text: &str) {
        self.metrics.lock().entry(slot).or_default().push(text.to_string());
    }

    fn on_status(&self, slot: SlotId, status: RunStatus) {
        self.log.lock().push(format!("{} {}", slot, status));
        self.statuses.lock().entry(slot).or_default().push(status);
    }
}
