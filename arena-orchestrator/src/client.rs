//! Client for the relay server's config endpoints, and slot validation
//!
//! Front ends describe a slot as a [`SlotDraft`] and turn it into a
//! [`BackendConfig`] with [`SlotDraft::submit`]. DeepSeek drafts carry no
//! key; the real key is fetched from the server at submission time.

use crate::api::{DeepSeekSettings, ErrorBody, VllmSettings};
use crate::backend::BackendConfig;
use crate::runner::DEFAULT_BASE_URL;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors fetching server-side configuration
#[derive(Error, Debug)]
pub enum ConfigFetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

/// Why a slot draft was rejected
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Please select an Ollama model")]
    MissingOllamaModel,

    #[error("Please fill in the VLLM host and port")]
    MissingVllmEndpoint,

    #[error("Failed to load DeepSeek config: {0}")]
    DeepSeekConfig(#[source] ConfigFetchError),

    #[error("unknown slot {0:?}, expected ollama:<model>, vllm[:<model>] or deepseek")]
    UnknownSlot(String),
}

/// Result of listing Ollama models through the relay server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelListing {
    Available(Vec<String>),
    /// Ollama answered but has nothing installed
    NoneInstalled,
    /// Ollama (or the relay server) could not be reached
    Unreachable(String),
}

/// Shown in a config field whose value could not be fetched
pub const LOAD_FAILED: &str = "load failed";

/// Server-side settings as a front end displays them.
///
/// The DeepSeek key is the masked form; fields whose fetch failed read
/// [`LOAD_FAILED`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDisplay {
    pub deepseek_key: String,
    pub deepseek_model: String,
    pub vllm_host: String,
    pub vllm_port: String,
    pub vllm_model: String,
}

/// HTTP client for the relay server
#[derive(Clone)]
pub struct ArenaClient {
    client: Client,
    base_url: String,
}

impl Default for ArenaClient {
    fn default() -> Self {
        Self::new(Client::new(), DEFAULT_BASE_URL)
    }
}

impl ArenaClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn vllm_config(&self) -> Result<VllmSettings, ConfigFetchError> {
        self.get_json("/api/config/vllm").await
    }

    pub async fn deepseek_config(&self) -> Result<DeepSeekSettings, ConfigFetchError> {
        self.get_json("/api/config/deepseek").await
    }

    /// Fetch both config endpoints for display
    pub async fn config_display(&self) -> ConfigDisplay {
        let (deepseek, vllm) = tokio::join!(self.deepseek_config(), self.vllm_config());

        let (deepseek_key, deepseek_model) = match deepseek {
            Ok(settings) => (settings.api_key, settings.model),
            Err(e) => {
                warn!(error = %e, "Failed to load DeepSeek config");
                (LOAD_FAILED.to_string(), LOAD_FAILED.to_string())
            }
        };

        let (vllm_host, vllm_port, vllm_model) = match vllm {
            Ok(settings) => (settings.host, settings.port, settings.model),
            Err(e) => {
                warn!(error = %e, "Failed to load VLLM config");
                (
                    LOAD_FAILED.to_string(),
                    LOAD_FAILED.to_string(),
                    LOAD_FAILED.to_string(),
                )
            }
        };

        ConfigDisplay {
            deepseek_key,
            deepseek_model,
            vllm_host,
            vllm_port,
            vllm_model,
        }
    }

    pub async fn ollama_models(&self) -> ModelListing {
        match self.get_json::<Vec<String>>("/api/ollama/models").await {
            Ok(models) if models.is_empty() => ModelListing::NoneInstalled,
            Ok(models) => ModelListing::Available(models),
            Err(e) => {
                warn!(error = %e, "Failed to list Ollama models");
                ModelListing::Unreachable(e.to_string())
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigFetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ConfigFetchError::Status { status, message });
        }

        Ok(response.json().await?)
    }
}

/// A slot as entered by a user, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDraft {
    Ollama { model: Option<String> },
    Vllm { model: String, host: String, port: String },
    DeepSeek,
}

impl SlotDraft {
    /// Fill blank VLLM fields from the server's defaults
    pub fn with_vllm_defaults(self, defaults: &VllmSettings) -> Self {
        match self {
            SlotDraft::Vllm { model, host, port } => {
                let or = |value: String, fallback: &str| {
                    if value.trim().is_empty() {
                        fallback.to_string()
                    } else {
                        value
                    }
                };
                SlotDraft::Vllm {
                    model: or(model, &defaults.model),
                    host: or(host, &defaults.host),
                    port: or(port, &defaults.port),
                }
            }
            other => other,
        }
    }

    /// Validate into a [`BackendConfig`]
    pub async fn submit(self, client: &ArenaClient) -> Result<BackendConfig, ValidationError> {
        match self {
            SlotDraft::Ollama { model } => model
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .map(BackendConfig::ollama)
                .ok_or(ValidationError::MissingOllamaModel),

            SlotDraft::Vllm { model, host, port } => {
                let (host, port) = (host.trim(), port.trim());
                if host.is_empty() || port.is_empty() {
                    return Err(ValidationError::MissingVllmEndpoint);
                }
                Ok(BackendConfig::vllm(model.trim(), host, port))
            }

            SlotDraft::DeepSeek => {
                let settings = client
                    .deepseek_config()
                    .await
                    .map_err(ValidationError::DeepSeekConfig)?;
                Ok(BackendConfig::deepseek(settings.model, settings.real_key))
            }
        }
    }
}

impl FromStr for SlotDraft {
    type Err = ValidationError;

    /// `ollama:<model>`, `vllm`, `vllm:<model>` or `deepseek`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, rest) = match s.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (s, None),
        };

        match kind.to_lowercase().as_str() {
            "ollama" => Ok(SlotDraft::Ollama {
                model: rest.map(str::to_string).filter(|m| !m.trim().is_empty()),
            }),
            "vllm" => Ok(SlotDraft::Vllm {
                model: rest.unwrap_or_default().to_string(),
                host: String::new(),
                port: String::new(),
            }),
            "deepseek" if rest.is_none() => Ok(SlotDraft::DeepSeek),
            _ => Err(ValidationError::UnknownSlot(s.to_string())),
        }
    }
}
