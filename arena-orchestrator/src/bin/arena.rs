//! Arena CLI - run one prompt against several models side by side
//!
//! Usage:
//!   arena run ollama:qwen2.5:7b vllm deepseek --preset logic
//!   arena run ollama:llama3 ollama:mistral --input "Hello" --mode concurrent --runs 2
//!   arena models
//!   arena config
//!   arena presets

use anyhow::{bail, Context, Result};
use arena::client::{ArenaClient, ModelListing, SlotDraft};
use arena::presets::{self, PRESETS};
use arena::runner::DEFAULT_BASE_URL;
use arena::{
    BackendConfig, ExecutionMode, Framing, HttpTransport, MessageKind, Orchestrator, RunObserver,
    RunStatus, SlotId, TestInvocation, TestRunner,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Compare streaming answers from Ollama, VLLM and DeepSeek models", long_about = None)]
struct Cli {
    /// Relay server URL
    #[arg(short, long, global = true, default_value = DEFAULT_BASE_URL)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt against one or more model slots
    Run {
        /// Slots: ollama:<model>, vllm[:<model>] or deepseek
        #[arg(required = true)]
        slots: Vec<String>,

        /// Prompt text
        #[arg(short, long, conflicts_with = "preset")]
        input: Option<String>,

        /// Built-in prompt key (see `arena presets`)
        #[arg(short, long)]
        preset: Option<String>,

        /// Number of runs; every run after the first clones the slots
        #[arg(short = 'n', long, default_value_t = 1)]
        runs: usize,

        /// sequential or concurrent
        #[arg(short, long, default_value = "sequential")]
        mode: ExecutionMode,

        /// How the response body is split into events: per-chunk or ndjson
        #[arg(short, long, default_value = "per-chunk")]
        framing: Framing,

        /// VLLM host for vllm slots (defaults to the server's config)
        #[arg(long)]
        vllm_host: Option<String>,

        /// VLLM port for vllm slots (defaults to the server's config)
        #[arg(long)]
        vllm_port: Option<String>,
    },

    /// List models installed on the Ollama server
    Models,

    /// List built-in prompts
    Presets,

    /// Show the server's DeepSeek and VLLM settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let client = ArenaClient::new(http.clone(), &cli.server);

    match cli.command {
        Commands::Models => list_models(&client).await,
        Commands::Presets => {
            list_presets();
            Ok(())
        }
        Commands::Config => {
            show_config(&client).await;
            Ok(())
        }
        Commands::Run {
            slots,
            input,
            preset,
            runs,
            mode,
            framing,
            vllm_host,
            vllm_port,
        } => {
            let invocation = build_invocation(input, preset)?;
            let configs = resolve_slots(&client, &slots, vllm_host, vllm_port).await?;

            let transport = HttpTransport::with_client(http, &cli.server);
            let runner = TestRunner::new(Arc::new(transport)).with_framing(framing);
            let mut orchestrator = Orchestrator::new(runner).with_mode(mode);
            for config in configs {
                orchestrator.add_slot(config);
            }

            run(&mut orchestrator, &invocation, runs).await
        }
    }
}

async fn list_models(client: &ArenaClient) -> Result<()> {
    match client.ollama_models().await {
        ModelListing::Available(models) => {
            for model in models {
                println!("{}", model);
            }
            Ok(())
        }
        ModelListing::NoneInstalled => {
            println!("{}", "No models installed".yellow());
            Ok(())
        }
        ModelListing::Unreachable(reason) => {
            bail!("Cannot connect to Ollama service: {}", reason)
        }
    }
}

async fn show_config(client: &ArenaClient) {
    let display = client.config_display().await;
    println!("{}", "DeepSeek".bold());
    println!("  {:<8} {}", "api_key", display.deepseek_key);
    println!("  {:<8} {}", "model", display.deepseek_model);
    println!("{}", "VLLM".bold());
    println!("  {:<8} {}", "host", display.vllm_host);
    println!("  {:<8} {}", "port", display.vllm_port);
    println!("  {:<8} {}", "model", display.vllm_model);
}

fn list_presets() {
    for preset in PRESETS.iter() {
        println!("{:<14} {}", preset.key.bold(), preset.title);
        println!("{:<14} {}", "", preset.prompt.dimmed());
    }
}

fn build_invocation(input: Option<String>, preset: Option<String>) -> Result<TestInvocation> {
    match (input, preset) {
        (Some(input), _) => Ok(TestInvocation::new(input, "")),
        (None, Some(key)) => {
            let preset = presets::find(&key)
                .with_context(|| format!("Unknown preset '{}' (see `arena presets`)", key))?;
            Ok(TestInvocation::new(preset.prompt, preset.title))
        }
        (None, None) => bail!("Please enter test content (--input or --preset)"),
    }
}

async fn resolve_slots(
    client: &ArenaClient,
    slots: &[String],
    vllm_host: Option<String>,
    vllm_port: Option<String>,
) -> Result<Vec<BackendConfig>> {
    let mut drafts = slots
        .iter()
        .map(|s| s.parse::<SlotDraft>())
        .collect::<Result<Vec<_>, _>>()?;

    for draft in drafts.iter_mut() {
        if let SlotDraft::Vllm { host, port, .. } = draft {
            if let Some(h) = &vllm_host {
                *host = h.clone();
            }
            if let Some(p) = &vllm_port {
                *port = p.clone();
            }
        }
    }

    if drafts.iter().any(|d| matches!(d, SlotDraft::Vllm { .. })) {
        match client.vllm_config().await {
            Ok(defaults) => {
                drafts = drafts
                    .into_iter()
                    .map(|d| d.with_vllm_defaults(&defaults))
                    .collect();
            }
            Err(e) => warn!(error = %e, "Failed to load VLLM config"),
        }
    }

    let mut configs = Vec::with_capacity(drafts.len());
    for (draft, raw) in drafts.into_iter().zip(slots) {
        let config = draft
            .submit(client)
            .await
            .with_context(|| format!("Invalid slot '{}'", raw))?;
        configs.push(config);
    }
    Ok(configs)
}

async fn run(orchestrator: &mut Orchestrator, invocation: &TestInvocation, runs: usize) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{}", "Cancelling...".yellow());
                cancel.cancel();
            }
        });
    }

    if !invocation.title.is_empty() {
        println!("{} {}", "Test:".bold(), invocation.title);
    }
    println!("{} {}\n", "Input:".bold(), invocation.input);

    let observer = ConsoleObserver::new(orchestrator.mode());

    for n in 0..runs.max(1) {
        if cancel.is_cancelled() {
            break;
        }
        let report = orchestrator.execute_run(invocation, &observer, &cancel).await?;
        info!(
            run = n + 1,
            group = report.group,
            cloned = report.cloned,
            "Run done"
        );
    }

    print_summary(orchestrator);
    Ok(())
}

fn print_summary(orchestrator: &Orchestrator) {
    println!("\n{}", "SUMMARY".bold());
    println!("{:<8} {:<40} {:<10} {:>10} {:>8}", "SLOT", "BACKEND", "STATUS", "ELAPSED", "CHARS");

    for group in orchestrator.groups() {
        for slot in group.slots() {
            let state = slot.snapshot();
            let elapsed = state
                .elapsed()
                .map(|d| format!("{}ms", d.as_millis()))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<8} {:<40} {:<10} {:>10} {:>8}",
                slot.id().to_string(),
                truncate(&slot.config().to_string(), 40),
                paint(state.status()),
                elapsed,
                state.accumulated_text().chars().count()
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max - 1).collect();
        format!("{}…", kept)
    }
}

fn paint(status: RunStatus) -> String {
    let label = format!("{:<10}", status.to_string());
    match status {
        RunStatus::Completed => label.green().to_string(),
        RunStatus::Failed => label.red().to_string(),
        RunStatus::Running => label.yellow().to_string(),
        RunStatus::Idle => label.dimmed().to_string(),
    }
}

/// Per-slot view kept by the console
#[derive(Default)]
struct Card {
    label: String,
    /// Bytes of output already written (sequential mode)
    printed: usize,
    output: String,
    errors: Vec<String>,
    metrics: String,
}

/// Renders runs on the terminal.
///
/// Sequential runs stream each slot's output as it arrives. Concurrent runs
/// interleave, so each slot is printed as a block once it finishes.
struct ConsoleObserver {
    mode: ExecutionMode,
    cards: Mutex<HashMap<SlotId, Card>>,
}

impl ConsoleObserver {
    fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            cards: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> bool {
        self.mode == ExecutionMode::Sequential
    }
}

impl RunObserver for ConsoleObserver {
    fn on_group(&self, group: usize, slots: &[(SlotId, BackendConfig)]) {
        let mut cards = self.cards.lock();
        for (id, config) in slots {
            cards.insert(
                *id,
                Card {
                    label: format!("{} ({})", config, config.kind().label()),
                    ..Card::default()
                },
            );
        }
        println!("{}", format!("=== Run group {} ===", group).cyan().bold());
    }

    fn on_message(&self, slot: SlotId, kind: MessageKind, content: &str) {
        if kind != MessageKind::Error {
            return;
        }
        let mut cards = self.cards.lock();
        let card = cards.entry(slot).or_default();
        if self.live() {
            println!("\n{} {}", format!("{}:", kind.label()).red().bold(), content.red());
        } else {
            card.errors.push(content.to_string());
        }
    }

    fn on_output(&self, slot: SlotId, accumulated: &str) {
        let mut cards = self.cards.lock();
        let card = cards.entry(slot).or_default();
        if self.live() {
            if let Some(delta) = accumulated.get(card.printed..) {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            }
            card.printed = accumulated.len();
        } else {
            card.output = accumulated.to_string();
        }
    }

    fn on_metrics(&self, slot: SlotId, text: &str) {
        self.cards.lock().entry(slot).or_default().metrics = text.to_string();
    }

    fn on_status(&self, slot: SlotId, status: RunStatus) {
        let cards = self.cards.lock();
        let Some(card) = cards.get(&slot) else {
            return;
        };

        match (status, self.live()) {
            (RunStatus::Running, true) => {
                println!("{} {}", format!("[{}]", slot).bold(), card.label.bold());
            }
            (RunStatus::Completed | RunStatus::Failed, true) => {
                println!("\n{} {}\n", paint(status), card.metrics.dimmed());
            }
            (RunStatus::Completed | RunStatus::Failed, false) => {
                println!("{} {}", format!("[{}]", slot).bold(), card.label.bold());
                if !card.output.is_empty() {
                    println!("{}", card.output);
                }
                for error in &card.errors {
                    println!("{} {}", "Error:".red().bold(), error.red());
                }
                println!("{} {}\n", paint(status), card.metrics.dimmed());
            }
            _ => {}
        }
    }
}
