//! Process entrypoint: the agent, the emulator, or both in one process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use verifone_bridge::config::BridgeConfig;
use verifone_bridge::emulator::{self, persist, TerminalStore};
use verifone_bridge::gateway::{self, AppState};

#[derive(Parser)]
#[command(author, version, about = "POS integration agent and terminal emulator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the HTTP agent that drives a payment terminal
    Agent,
    /// Run the terminal emulator
    Emulator,
    /// Run agent and emulator together (default)
    Both,
}

struct EmulatorRuntime {
    store: Arc<TerminalStore>,
    path: PathBuf,
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    }
}

async fn start_emulator(
    cfg: &BridgeConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<EmulatorRuntime> {
    let dir = PathBuf::from(&cfg.emulator_data_dir);
    let path = persist::state_path(&dir);
    let state = persist::load(&path);

    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
    let store = Arc::new(TerminalStore::new(state, Some(snapshot_tx.clone())));
    persist::spawn_writer(path.clone(), snapshot_rx);
    persist::spawn_flush_timer(store.clone(), snapshot_tx);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.terminal_port))
        .await
        .with_context(|| format!("failed to bind terminal port {}", cfg.terminal_port))?;
    tokio::spawn(emulator::run(listener, store.clone(), shutdown));

    Ok(EmulatorRuntime { store, path })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = BridgeConfig::from_env();
    let mode = cli.command.unwrap_or(Mode::Both);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut emulator_rt = None;
    if matches!(mode, Mode::Emulator | Mode::Both) {
        emulator_rt = Some(start_emulator(&cfg, shutdown_rx.clone()).await?);
    }

    let mut agent_task = None;
    if matches!(mode, Mode::Agent | Mode::Both) {
        let listener = gateway::bind(cfg.agent_http_port).await?;
        let state = AppState::new(cfg.clone());
        let rx = shutdown_rx.clone();
        agent_task = Some(tokio::spawn(async move {
            if let Err(e) = gateway::serve_on(listener, state, rx).await {
                error!("agent server error: {e}");
            }
        }));
    }

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Some(rt) = emulator_rt {
        match rt.store.snapshot_json() {
            Ok(snapshot) => match persist::write_atomic(&rt.path, &snapshot) {
                Ok(()) => info!("state flushed to {}", rt.path.display()),
                Err(e) => warn!("final state flush failed: {e}"),
            },
            Err(e) => warn!("could not snapshot state on shutdown: {e}"),
        }
    }
    if let Some(task) = agent_task {
        let _ = task.await;
    }
    Ok(())
}
