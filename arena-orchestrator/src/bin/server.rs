//! Arena relay server binary

use anyhow::{Context, Result};
use arena::api::{create_router, ApiState};
use arena::{ArenaConfig, DeepSeekConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let mut config = load_config(&config_path)?;

    // Environment key wins only when the file has none
    if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
        let deepseek = config.deepseek.get_or_insert_with(DeepSeekConfig::default);
        if deepseek.api_key.as_deref().map_or(true, str::is_empty) {
            deepseek.api_key = Some(key);
        }
    }

    info!(
        config_path = config_path,
        ollama = config.ollama.base_url,
        vllm = config.vllm.is_some(),
        deepseek_key = config
            .deepseek
            .as_ref()
            .and_then(|d| d.api_key.as_ref())
            .is_some(),
        "Loaded configuration"
    );

    if config.deepseek.as_ref().and_then(|d| d.api_key.as_ref()).is_none() {
        warn!("No DeepSeek API key configured (set [deepseek] api_key or DEEPSEEK_API_KEY)");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let state = Arc::new(ApiState::new(config, client));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// A missing file means defaults; an unreadable or invalid one is an error
fn load_config(path: &str) -> Result<ArenaConfig> {
    if !Path::new(path).exists() {
        warn!(config_path = path, "Config file not found, using defaults");
        return Ok(ArenaConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    ArenaConfig::from_toml(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path))
}
