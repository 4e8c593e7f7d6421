//! Backend configurations for models under comparison

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which inference backend a slot talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ollama,
    Vllm,
    DeepSeek,
}

impl BackendKind {
    /// Human-readable label shown on a slot's card
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "Ollama (local)",
            BackendKind::Vllm => "VLLM (local)",
            BackendKind::DeepSeek => "DeepSeek API",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ollama => write!(f, "ollama"),
            BackendKind::Vllm => write!(f, "vllm"),
            BackendKind::DeepSeek => write!(f, "deepseek"),
        }
    }
}

/// Configuration of one backend instance.
///
/// Serialized internally tagged by `type`, which is the shape `POST /api/chat`
/// expects in its `config` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Ollama {
        model: String,
    },
    Vllm {
        model: String,
        host: String,
        port: String,
    },
    DeepSeek {
        model: String,
        api_key: String,
    },
}

impl BackendConfig {
    pub fn ollama(model: impl Into<String>) -> Self {
        BackendConfig::Ollama {
            model: model.into(),
        }
    }

    pub fn vllm(
        model: impl Into<String>,
        host: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        BackendConfig::Vllm {
            model: model.into(),
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn deepseek(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        BackendConfig::DeepSeek {
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Ollama { .. } => BackendKind::Ollama,
            BackendConfig::Vllm { .. } => BackendKind::Vllm,
            BackendConfig::DeepSeek { .. } => BackendKind::DeepSeek,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            BackendConfig::Ollama { model }
            | BackendConfig::Vllm { model, .. }
            | BackendConfig::DeepSeek { model, .. } => model,
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub input: String,
    pub config: BackendConfig,
}

/// Never prints the DeepSeek key
impl fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Vllm { model, host, port } => {
                write!(f, "vllm:{} @ {}:{}", model, host, port)
            }
            other => write!(f, "{}:{}", other.kind(), other.model()),
        }
    }
}
