//! REST API for the relay server

use crate::backend::ChatRequest;
use crate::provider::{provider_for, OllamaProvider};
use crate::ArenaConfig;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// API state
pub struct ApiState {
    pub config: ArenaConfig,
    pub client: Client,
}

impl ApiState {
    pub fn new(config: ArenaConfig, client: Client) -> Self {
        Self { config, client }
    }
}

/// `GET /api/config/vllm`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VllmSettings {
    pub host: String,
    pub port: String,
    pub model: String,
}

/// `GET /api/config/deepseek`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepSeekSettings {
    /// Masked for display
    pub api_key: String,
    pub model: String,
    /// Used when submitting a DeepSeek slot
    pub real_key: String,
}

/// Body of every non-2xx response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error response carrying `{"error": ...}`
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .route("/api/config/vllm", get(vllm_config))
        .route("/api/config/deepseek", get(deepseek_config))
        .route("/api/ollama/models", get(ollama_models))
        .route("/api/chat", post(chat));

    let router = match &state.config.server.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Mask all but the first and last four characters.
///
/// Keys of eight characters or fewer are masked completely.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

async fn vllm_config(State(state): State<Arc<ApiState>>) -> Result<Json<VllmSettings>, ApiError> {
    let vllm = state
        .config
        .vllm
        .as_ref()
        .ok_or_else(|| ApiError::internal("No [vllm] section in config"))?;

    Ok(Json(VllmSettings {
        host: vllm.host.clone(),
        port: vllm.port.clone(),
        model: vllm.model.clone(),
    }))
}

async fn deepseek_config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<DeepSeekSettings>, ApiError> {
    let deepseek = state
        .config
        .deepseek
        .as_ref()
        .ok_or_else(|| ApiError::internal("No [deepseek] section in config"))?;
    let key = deepseek
        .api_key
        .as_ref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::internal("No DeepSeek api_key configured"))?;

    Ok(Json(DeepSeekSettings {
        api_key: mask_key(key),
        model: deepseek.model.clone(),
        real_key: key.clone(),
    }))
}

async fn ollama_models(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<String>>, ApiError> {
    match OllamaProvider::list_models(&state.client, &state.config.ollama.base_url).await {
        Ok(models) => Ok(Json(models)),
        Err(e) => {
            warn!(error = %e, "Failed to list Ollama models");
            match e {
                crate::provider::ProviderError::ConnectionError { .. } => {
                    Err(ApiError::internal("Cannot connect to Ollama service"))
                }
                other => Err(ApiError::internal(format!(
                    "Failed to list Ollama models: {}",
                    other
                ))),
            }
        }
    }
}

/// Relay a chat request, streaming one JSON object per line
async fn chat(State(state): State<Arc<ApiState>>, Json(request): Json<ChatRequest>) -> Response {
    let provider = provider_for(&request.config, &state.config, state.client.clone());

    info!(
        provider = provider.name(),
        model = provider.model(),
        input_chars = request.input.chars().count(),
        "Received chat request"
    );

    let events = provider.stream(&request.input).await;
    let body = Body::from_stream(events.map(|event| Ok::<_, Infallible>(event.to_line())));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}
