//! Liveness endpoints and the keep-alive self-ping.
//!
//! Free-tier hosts idle the process out and probe it over HTTP, so the
//! relay exposes a tiny axum app and optionally pings its own public URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::Store;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct HealthState {
    store: Arc<dyn Store>,
    started: Instant,
}

pub fn health_routes(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .with_state(HealthState {
            store,
            started: Instant::now(),
        })
}

async fn root() -> &'static str {
    "OK - bot alive"
}

/// Readiness: verifies the store still answers.
async fn health(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let uptime_sec = state.started.elapsed().as_secs();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "uptime_sec": uptime_sec })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "degraded",
                "error": e.to_string(),
                "uptime_sec": uptime_sec,
            })),
        ),
    }
}

/// Bind and serve the health app.
pub fn spawn_server(port: u16, store: Arc<dyn Store>) -> JoinHandle<()> {
    let app = health_routes(store);
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await {
            Ok(l) => l,
            Err(e) => {
                warn!(port, error = %e, "Failed to bind health server port");
                return;
            }
        };
        info!(port, "Health server started");
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Health server stopped");
        }
    })
}

/// Periodically fetch our own public URL so the host never idles us out.
pub fn spawn_keep_alive(url: String) -> JoinHandle<()> {
    let client = reqwest::Client::new();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        loop {
            interval.tick().await;
            match client.get(&url).send().await {
                Ok(resp) => info!(status = %resp.status(), "Keep-alive ping"),
                Err(e) => warn!(error = %e, "Keep-alive ping failed"),
            }
        }
    })
}
