//! Arena - side-by-side streaming comparison of language models
//!
//! This crate provides:
//! - A streaming chat consumer that decodes chunked JSON bodies per model
//! - A run orchestrator that fans one prompt out to many backend slots
//! - A relay server exposing Ollama, VLLM and DeepSeek behind one `/api/chat`
//! - A config client and slot validation for front ends

pub mod api;
pub mod backend;
pub mod client;
pub mod observer;
pub mod orchestrator;
pub mod presets;
pub mod provider;
pub mod run_state;
pub mod runner;
pub mod slot;
pub mod stream;

#[cfg(test)]
mod testing;

pub use backend::{BackendConfig, BackendKind, ChatRequest};
pub use observer::{MessageKind, NullObserver, RunObserver};
pub use orchestrator::{ExecutionMode, Orchestrator, OrchestratorError, RunGroup, RunReport};
pub use run_state::{RunState, RunStatus};
pub use runner::{ChatTransport, HttpTransport, RunOutcome, TestInvocation, TestRunner};
pub use slot::{ModelSlot, SlotId};
pub use stream::{Framing, StreamDecoder, StreamEvent};

use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// Configuration for the relay server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Defaults for VLLM slots; `/api/config/vllm` fails without it
    pub vllm: Option<VllmConfig>,

    /// DeepSeek credentials; `/api/config/deepseek` fails without a key
    pub deepseek: Option<DeepSeekConfig>,
}

impl ArenaConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory of static files served for any unmatched path
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5001 }

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Ollama's `num_predict`
    #[serde(default = "default_ollama_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            temperature: default_temperature(),
            max_tokens: default_ollama_max_tokens(),
        }
    }
}

fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_ollama_max_tokens() -> u32 { 1000 }
fn default_max_tokens() -> u32 { 2000 }

#[derive(Debug, Clone, Deserialize)]
pub struct VllmConfig {
    pub host: String,

    /// Accepts `port = 8000` or `port = "8000"`
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepSeekConfig {
    /// Falls back to `DEEPSEEK_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_deepseek_model")]
    pub model: String,

    #[serde(default = "default_deepseek_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Delay between replayed characters (ms)
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_deepseek_model(),
            base_url: default_deepseek_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            replay_delay_ms: default_replay_delay_ms(),
        }
    }
}

fn default_deepseek_model() -> String { "deepseek-chat".to_string() }
fn default_deepseek_url() -> String { "https://api.deepseek.com".to_string() }
fn default_replay_delay_ms() -> u64 { 10 }

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
