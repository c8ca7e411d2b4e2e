//! Liveness endpoint.
//!
//! Reports process uptime and whether the gateway session is ready. It knows nothing
//! about guild playback on purpose.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use axum::{extract::State, response::Html, routing::get, Json, Router};
use serde::Serialize;
use tokio::{net::TcpListener, time::Instant};
use tracing::info;

#[derive(Clone)]
pub struct HealthState {
    started: Instant,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag flipped by the gateway handler once the session is ready.
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime: u64,
    pub timestamp: String,
    pub ready: bool,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(port: u16, state: HealthState) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind health endpoint on port {}", port))?;

    info!("🌐 Health endpoint listening on port {}", port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn status_page(State(state): State<HealthState>) -> Html<String> {
    let uptime = humantime::format_duration(std::time::Duration::from_secs(state.uptime_secs()));
    let status = if state.is_ready() { "Online" } else { "Starting" };

    Html(format!(
        "<h1>🎵 Jukebox</h1>\n<p>Status: {}</p>\n<p>Uptime: {}</p>\n",
        status, uptime
    ))
}

async fn health(State(state): State<HealthState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "online",
        uptime: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ready: state.is_ready(),
    })
}
