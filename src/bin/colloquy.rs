//! CLI binary for colloquy.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colloquy::config::ColloquyConfig;
use colloquy::conversation::{SessionRegistry, SessionSettings};
use colloquy::llm::ApiCompletionClient;
use colloquy::pipeline::console::{ConsoleSink, spawn_stdin_reader};
use colloquy::pipeline::{ChannelTranscriptSource, DialogueScript, TurnCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Colloquy: turn-taking orchestrator for voice assistants.
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Converse on the terminal (one line per utterance).
    Chat {
        /// Wait for `/listen` before each utterance instead of listening continuously.
        #[arg(long)]
        manual: bool,
    },

    /// Serve networked sessions over WebSocket.
    Serve {
        /// Bind host (overrides config).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check that the completion backend is reachable and list its models.
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("colloquy=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Chat { manual: false }) {
        Command::Chat { manual } => run_chat(config, manual).await,
        Command::Serve { host, port } => run_serve(config, host, port).await,
        Command::Probe => run_probe(config).await,
    }
}

/// File (explicit or default path), then `.env` and environment overrides.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ColloquyConfig> {
    let mut config = match path {
        Some(path) => ColloquyConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let default_path = ColloquyConfig::default_config_path();
            if default_path.exists() {
                ColloquyConfig::from_file(&default_path)
                    .with_context(|| format!("failed to load {}", default_path.display()))?
            } else {
                ColloquyConfig::default()
            }
        }
    };

    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        warn!("ignoring unreadable .env file: {e}");
    }
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Cancel `cancel` on Ctrl+C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });
}

async fn run_chat(mut config: ColloquyConfig, manual: bool) -> anyhow::Result<()> {
    if manual {
        config.conversation.continuous = false;
    }
    let client = Arc::new(ApiCompletionClient::new(&config.llm)?);

    let registry = SessionRegistry::new(SessionSettings::from(&config.conversation));
    let id = registry.create().await;
    let session = registry
        .get(&id)
        .await
        .context("session vanished right after creation")?;

    let (input, source, control_rx) = ChannelTranscriptSource::with_controls(8);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let reader = spawn_stdin_reader(input, cancel.clone());

    println!("Colloquy v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Model {} at {}. Commands: /clear /stop /listen /quit. Press Ctrl+C to quit.\n",
        client.model(),
        client.base_url()
    );

    let result = TurnCoordinator::new(
        id.clone(),
        session,
        client,
        source,
        ConsoleSink::stdout(),
        control_rx,
    )
    .with_listen(config.listen.clone())
    .with_script(DialogueScript::from(&config.conversation))
    .with_cancel(cancel.clone())
    .run()
    .await;

    cancel.cancel();
    reader.abort();
    registry.destroy(&id).await;
    result?;
    Ok(())
}

async fn run_serve(
    mut config: ColloquyConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let client = Arc::new(ApiCompletionClient::new(&config.llm)?);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    colloquy::gateway::run_gateway(&config, client, cancel).await?;
    Ok(())
}

async fn run_probe(config: ColloquyConfig) -> anyhow::Result<()> {
    let client = ApiCompletionClient::new(&config.llm)?;
    println!("Probing {} ...", client.base_url());

    let models = client.list_models().await?;
    if models.is_empty() {
        println!("Backend reachable but reports no loaded models.");
        return Ok(());
    }

    println!("Backend reachable. Models:");
    for model in &models {
        let marker = if model == client.model() { "*" } else { " " };
        println!(" {marker} {model}");
    }
    if !models.iter().any(|m| m == client.model()) {
        warn!(
            "configured model `{}` is not among the served models",
            client.model()
        );
    }
    Ok(())
}
