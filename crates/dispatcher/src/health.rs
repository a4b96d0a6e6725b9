//! Health endpoint exposing the most recent run summary.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::summary::RunSummary;

/// Last completed run, shared between the coordinator and the endpoint.
pub type LastRun = Arc<RwLock<Option<RunSummary>>>;

pub fn router(last_run: LastRun) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(last_run)
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(last_run): State<LastRun>) -> Json<serde_json::Value> {
    let last_run = last_run.read().await.clone();
    Json(json!({
        "status": "ok",
        "service": "newswire-dispatcher",
        "version": env!("CARGO_PKG_VERSION"),
        "last_run": last_run,
    }))
}

pub async fn serve(addr: SocketAddr, last_run: LastRun) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health endpoint listening on {}", addr);
    axum::serve(listener, router(last_run)).await?;
    Ok(())
}
