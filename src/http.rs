//! Read-only accessor: liveness and the current registry contents.

use std::future::Future;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::config::HttpConfig;
use crate::scheduler::Command;
use crate::stats::StatsView;

#[derive(Clone)]
struct AccessorState {
    commands: mpsc::Sender<Command>,
}

pub fn router(commands: mpsc::Sender<Command>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(AccessorState { commands })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Asks the aggregator task for a snapshot; it owns the registry.
async fn stats(State(state): State<AccessorState>) -> Result<Json<StatsView>, StatusCode> {
    let (reply, response) = oneshot::channel();
    state
        .commands
        .send(Command::Stats(reply))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    response
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

pub async fn bind(config: &HttpConfig) -> anyhow::Result<TcpListener> {
    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding http listener on {addr}"))?;
    info!("http server listening on {}", addr);
    Ok(listener)
}

pub async fn serve<F>(
    listener: TcpListener,
    commands: mpsc::Sender<Command>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(commands))
        .with_graceful_shutdown(shutdown)
        .await
}
