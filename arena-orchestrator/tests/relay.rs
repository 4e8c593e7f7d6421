//! End-to-end tests: fake upstreams on loopback, the relay router in front of
//! them, and the orchestrator reading `/api/chat` over real HTTP.

use arena::api::{create_router, ApiState};
use arena::client::{ArenaClient, ModelListing, SlotDraft, LOAD_FAILED};
use arena::{
    ArenaConfig, BackendConfig, DeepSeekConfig, ExecutionMode, Framing, HttpTransport,
    MessageKind, NullObserver, Orchestrator, RunObserver, RunStatus, SlotId, TestInvocation,
    TestRunner, VllmConfig,
};
use axum::routing::{get, post};
use axum::{http::StatusCode, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_relay(config: ArenaConfig) -> String {
    let state = Arc::new(ApiState::new(config, reqwest::Client::new()));
    serve(create_router(state)).await
}

fn fake_ollama(models: Value) -> Router {
    Router::new()
        .route(
            "/api/tags",
            get(move || {
                let models = models.clone();
                async move { Json(models) }
            }),
        )
        .route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                assert_eq!(body["options"]["num_predict"], 1000);
                concat!(
                    "{\"response\":\"Hi\",\"done\":false}\n",
                    "{\"response\":\" there\",\"done\":false}\n",
                    "{\"response\":\"\",\"done\":true}\n",
                )
            }),
        )
}

fn config_with_ollama(base_url: &str) -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.ollama.base_url = base_url.to_string();
    config
}

fn orchestrator(relay: &str) -> Orchestrator {
    let transport = HttpTransport::new(relay).unwrap();
    let runner = TestRunner::new(Arc::new(transport)).with_framing(Framing::Ndjson);
    Orchestrator::new(runner)
}

#[derive(Default)]
struct ErrorLog(Mutex<Vec<(SlotId, String)>>);

impl RunObserver for ErrorLog {
    fn on_message(&self, slot: SlotId, kind: MessageKind, content: &str) {
        if kind == MessageKind::Error {
            self.0.lock().push((slot, content.to_string()));
        }
    }
}

#[tokio::test]
async fn test_ollama_answer_streams_through_relay() {
    let upstream = serve(fake_ollama(json!({"models": []}))).await;
    let relay = start_relay(config_with_ollama(&upstream)).await;

    let mut orchestrator = orchestrator(&relay);
    let slot = orchestrator.add_slot(BackendConfig::ollama("llama3"));

    let report = orchestrator
        .execute_run(
            &TestInvocation::new("Say hi", "Greeting"),
            &NullObserver,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.group, 0);
    assert_eq!(report.count(RunStatus::Completed), 1);

    let state = slot.snapshot();
    assert_eq!(state.status(), RunStatus::Completed);
    assert_eq!(state.accumulated_text(), "Hi there");
    assert!(state.finished_at().unwrap() >= state.started_at().unwrap());
}

#[tokio::test]
async fn test_second_run_clones_slots_and_keeps_first_output() {
    let upstream = serve(fake_ollama(json!({"models": []}))).await;
    let relay = start_relay(config_with_ollama(&upstream)).await;

    let mut orchestrator = orchestrator(&relay).with_mode(ExecutionMode::Concurrent);
    orchestrator.add_slot(BackendConfig::ollama("llama3"));
    orchestrator.add_slot(BackendConfig::ollama("mistral"));

    let invocation = TestInvocation::new("Say hi", "");
    let cancel = CancellationToken::new();
    orchestrator.execute_run(&invocation, &NullObserver, &cancel).await.unwrap();
    let report = orchestrator.execute_run(&invocation, &NullObserver, &cancel).await.unwrap();

    assert!(report.cloned);
    assert_eq!(orchestrator.groups().len(), 2);
    for group in orchestrator.groups() {
        for slot in group.slots() {
            assert_eq!(slot.snapshot().accumulated_text(), "Hi there");
        }
    }
}

#[tokio::test]
async fn test_unreachable_ollama_reports_error_event() {
    let relay = start_relay(config_with_ollama("http://127.0.0.1:9")).await;

    let mut orchestrator = orchestrator(&relay);
    let slot = orchestrator.add_slot(BackendConfig::ollama("llama3"));
    let errors = ErrorLog::default();

    orchestrator
        .execute_run(&TestInvocation::new("hi", ""), &errors, &CancellationToken::new())
        .await
        .unwrap();

    // The relay answered 200; the upstream failure arrives in-band
    assert_eq!(slot.status(), RunStatus::Completed);
    assert_eq!(slot.snapshot().accumulated_text(), "");
    let errors = errors.0.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.starts_with("Cannot connect to Ollama service"));
}

#[tokio::test]
async fn test_relay_down_fails_run() {
    let mut orchestrator = orchestrator("http://127.0.0.1:9");
    let slot = orchestrator.add_slot(BackendConfig::ollama("llama3"));

    orchestrator
        .execute_run(&TestInvocation::new("hi", ""), &NullObserver, &CancellationToken::new())
        .await
        .unwrap();

    let state = slot.snapshot();
    assert_eq!(state.status(), RunStatus::Failed);
    assert!(state.error().unwrap_or_default().starts_with("Connection failed"));
    assert_eq!(state.accumulated_text(), "");
}

#[tokio::test]
async fn test_vllm_sse_stream() {
    let upstream = serve(Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["model"], "Qwen");
            assert_eq!(body["max_tokens"], 2000);
            concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"你\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"好\"}}]}\n\n",
                "data: [DONE]\n\n",
            )
        }),
    ))
    .await;
    let port = upstream.rsplit(':').next().unwrap().to_string();

    let mut config = ArenaConfig::default();
    config.vllm = Some(VllmConfig {
        host: "127.0.0.1".to_string(),
        port: port.clone(),
        model: "Qwen".to_string(),
        temperature: 0.7,
        max_tokens: 2000,
    });
    let relay = start_relay(config).await;

    // Blank slot fields come from the server's [vllm] section
    let client = ArenaClient::new(reqwest::Client::new(), &relay);
    let defaults = client.vllm_config().await.unwrap();
    assert_eq!(defaults.port, port);

    let draft = SlotDraft::Vllm {
        model: String::new(),
        host: String::new(),
        port: String::new(),
    }
    .with_vllm_defaults(&defaults);
    let config = draft.submit(&client).await.unwrap();

    let mut orchestrator = orchestrator(&relay);
    let slot = orchestrator.add_slot(config);
    orchestrator
        .execute_run(&TestInvocation::new("greet", ""), &NullObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(slot.snapshot().accumulated_text(), "你好");
}

fn fake_deepseek() -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(
            |headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if auth != "Bearer sk-abcdef123456" {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({"error": {"message": "Authentication Fails"}})),
                    );
                }
                (
                    StatusCode::OK,
                    Json(json!({"choices": [{"message": {"role": "assistant", "content": "Cao Cao"}}]})),
                )
            },
        ),
    )
}

fn deepseek_config(base_url: &str, key: &str) -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.deepseek = Some(DeepSeekConfig {
        api_key: Some(key.to_string()),
        base_url: base_url.to_string(),
        replay_delay_ms: 0,
        ..DeepSeekConfig::default()
    });
    config
}

#[tokio::test]
async fn test_deepseek_replays_answer_with_fetched_key() {
    let upstream = serve(fake_deepseek()).await;
    let relay = start_relay(deepseek_config(&upstream, "sk-abcdef123456")).await;

    let client = ArenaClient::new(reqwest::Client::new(), &relay);
    let settings = client.deepseek_config().await.unwrap();
    assert_eq!(settings.api_key, "sk-a*******3456");
    assert_eq!(settings.model, "deepseek-chat");

    let config = SlotDraft::DeepSeek.submit(&client).await.unwrap();
    assert_eq!(config, BackendConfig::deepseek("deepseek-chat", "sk-abcdef123456"));

    let mut orchestrator = orchestrator(&relay);
    let slot = orchestrator.add_slot(config);
    orchestrator
        .execute_run(&TestInvocation::new("who?", ""), &NullObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(slot.snapshot().accumulated_text(), "Cao Cao");
}

#[tokio::test]
async fn test_deepseek_rejected_key_is_reported() {
    let upstream = serve(fake_deepseek()).await;
    let relay = start_relay(deepseek_config(&upstream, "sk-wrong")).await;

    let mut orchestrator = orchestrator(&relay);
    let slot = orchestrator.add_slot(BackendConfig::deepseek("deepseek-chat", "sk-wrong"));
    let errors = ErrorLog::default();

    orchestrator
        .execute_run(&TestInvocation::new("who?", ""), &errors, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(slot.status(), RunStatus::Completed);
    let errors = errors.0.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("DeepSeek API key is invalid"));
}

#[tokio::test]
async fn test_model_listing_states() {
    let upstream = serve(fake_ollama(json!({
        "models": [{"name": "llama3:latest", "model": "llama3:latest"}, {"name": "qwen2.5:7b"}]
    })))
    .await;
    let relay = start_relay(config_with_ollama(&upstream)).await;
    let client = ArenaClient::new(reqwest::Client::new(), &relay);
    assert_eq!(
        client.ollama_models().await,
        ModelListing::Available(vec!["llama3:latest".to_string(), "qwen2.5:7b".to_string()])
    );

    let upstream = serve(fake_ollama(json!({"models": []}))).await;
    let relay = start_relay(config_with_ollama(&upstream)).await;
    let client = ArenaClient::new(reqwest::Client::new(), &relay);
    assert_eq!(client.ollama_models().await, ModelListing::NoneInstalled);

    let relay = start_relay(config_with_ollama("http://127.0.0.1:9")).await;
    let client = ArenaClient::new(reqwest::Client::new(), &relay);
    match client.ollama_models().await {
        ModelListing::Unreachable(reason) => {
            assert!(reason.contains("Cannot connect to Ollama service"))
        }
        other => panic!("expected unreachable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_config_sections_are_server_errors() {
    let relay = start_relay(ArenaConfig::default()).await;
    let client = ArenaClient::new(reqwest::Client::new(), &relay);

    assert!(client.vllm_config().await.is_err());
    assert!(client.deepseek_config().await.is_err());

    let response = reqwest::get(format!("{}/api/config/vllm", relay)).await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_config_display_masks_key_and_marks_missing_sections() {
    let relay = start_relay(deepseek_config("http://127.0.0.1:9", "sk-abcdef123456")).await;
    let client = ArenaClient::new(reqwest::Client::new(), &relay);

    let display = client.config_display().await;
    assert_eq!(display.deepseek_key, "sk-a*******3456");
    assert_eq!(display.deepseek_model, "deepseek-chat");
    // No [vllm] section on this server
    assert_eq!(display.vllm_host, LOAD_FAILED);
    assert_eq!(display.vllm_port, LOAD_FAILED);
    assert_eq!(display.vllm_model, LOAD_FAILED);
}
