//! HTTP gateway (the agent side).
//!
//! Translates POS requests into single terminal sessions and returns the
//! final outcome together with the structured session log.

pub mod body;
pub mod handlers;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

use crate::config::BridgeConfig;

/// Shared gateway state: runtime config, the per-terminal gate, and the
/// process start time for `/health`.
pub struct AppState {
    pub config: RwLock<BridgeConfig>,
    pub gate: TerminalGate,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            gate: TerminalGate::default(),
            started: Instant::now(),
        })
    }

    pub fn config_snapshot(&self) -> BridgeConfig {
        match self.config.read() {
            Ok(cfg) => cfg.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// A physical terminal accepts one logical transaction at a time, so
/// transactional commands to the same `(ip, port)` serialize through a
/// keyed async mutex. Probes and Ping bypass the gate.
#[derive(Default)]
pub struct TerminalGate {
    locks: Mutex<HashMap<(String, u16), Arc<tokio::sync::Mutex<()>>>>,
}

impl TerminalGate {
    pub fn lock_for(&self, ip: &str, port: u16) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry((ip.to_string(), port)).or_default().clone()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/availability", get(handlers::availability))
        .route("/ping", get(handlers::ping))
        .route("/sale", post(handlers::sale))
        .route("/sale/lodging", post(handlers::sale_lodging))
        .route("/preauth", post(handlers::preauth))
        .route("/auth-completion", post(handlers::auth_completion))
        .route("/void", post(handlers::void))
        .route("/refund", post(handlers::refund))
        .route("/tip-adjust", post(handlers::tip_adjust))
        .route("/batch-close", post(handlers::batch_close))
        .route("/command", post(handlers::command))
        .route("/config", post(handlers::set_config))
        .with_state(state)
}

/// Bind the agent HTTP port. A failed bind is a startup error the caller
/// turns into a nonzero exit.
pub async fn bind(port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind agent HTTP port {port}"))
}

/// Serve on a pre-bound listener until the shutdown flag flips.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("agent HTTP listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

