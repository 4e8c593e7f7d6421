//! Chat stream decoding: bytes in, [`StreamEvent`]s out

use super::{LineDecoder, Utf8Decoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// How JSON objects are delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Each delivered chunk is exactly one JSON object.
    ///
    /// Chunks that coalesce or split objects fail to parse and are dropped.
    #[default]
    PerChunk,
    /// Objects are newline-terminated and reassembled across chunks
    Ndjson,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-chunk" | "chunk" => Ok(Framing::PerChunk),
            "ndjson" | "lines" => Ok(Framing::Ndjson),
            other => Err(format!("unknown framing '{}' (expected per-chunk or ndjson)", other)),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::PerChunk => write!(f, "per-chunk"),
            Framing::Ndjson => write!(f, "ndjson"),
        }
    }
}

/// One decoded unit of a chat stream.
///
/// This is also the object the relay server writes, one per line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: None,
            error: Some(message.into()),
        }
    }

    /// Build an event from a parsed JSON value.
    ///
    /// Only non-empty string `text` and string `error` fields count; any
    /// other value yields `None`.
    fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = object
            .get("text")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let error = object
            .get("error")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        if text.is_none() && error.is_none() {
            None
        } else {
            Some(Self { text, error })
        }
    }

    /// Serialize as a single NDJSON line
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

/// Turns response body chunks into [`StreamEvent`]s.
///
/// Parse failures are logged and skipped; they never end the stream.
#[derive(Debug)]
pub struct StreamDecoder {
    framing: Framing,
    utf8: Utf8Decoder,
    lines: LineDecoder,
    warnings: usize,
}

impl StreamDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            utf8: Utf8Decoder::new(),
            lines: LineDecoder::new(),
            warnings: 0,
        }
    }

    /// Number of fragments skipped because they were not valid JSON
    pub fn warnings(&self) -> usize {
        self.warnings
    }

    /// Feed one chunk as read from the body
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        match self.framing {
            Framing::PerChunk => {
                let text = self.utf8.decode(chunk);
                if text.is_empty() {
                    return Vec::new();
                }
                self.parse_fragment(&text).into_iter().collect()
            }
            Framing::Ndjson => self
                .lines
                .feed(chunk)
                .iter()
                .filter_map(|line| self.parse_fragment(line))
                .collect(),
        }
    }

    /// Signal end of stream and drain whatever is still buffered
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        match self.framing {
            Framing::PerChunk => {
                let tail = self.utf8.finish();
                if tail.is_empty() {
                    Vec::new()
                } else {
                    self.parse_fragment(&tail).into_iter().collect()
                }
            }
            Framing::Ndjson => match self.lines.finish() {
                Some(line) => self.parse_fragment(&line).into_iter().collect(),
                None => Vec::new(),
            },
        }
    }

    fn parse_fragment(&mut self, fragment: &str) -> Option<StreamEvent> {
        if self.framing == Framing::Ndjson && fragment.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<serde_json::Value>(fragment) {
            Ok(value) => StreamEvent::from_value(&value),
            Err(e) => {
                self.warnings += 1;
                warn!(
                    framing = %self.framing,
                    error = %e,
                    fragment_len = fragment.len(),
                    "Failed to parse stream fragment, skipping"
                );
                None
            }
        }
    }
}
