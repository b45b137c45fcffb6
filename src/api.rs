use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::monitor::WindowReport;

/// State shared between the monitor loop and the HTTP handlers.
#[derive(Clone, Default)]
pub struct ApiState {
    latest: Arc<RwLock<Option<WindowReport>>>,
}

impl ApiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: WindowReport) {
        let mut latest = self.latest.write().unwrap_or_else(|p| p.into_inner());
        *latest = Some(report);
    }

    pub fn latest(&self) -> Option<WindowReport> {
        self.latest
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics() -> impl IntoResponse {
    match metrics::metrics_text() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            text,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("{:#}", e),
        ),
    }
}

async fn latest_window(State(state): State<ApiState>) -> Result<Json<WindowReport>, StatusCode> {
    state.latest().map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/window", get(latest_window))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?;

    tracing::info!("Metrics server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Metrics server failed")?;

    tracing::info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_answers_and_shuts_down() {
        let _ = metrics::register_metrics();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state = ApiState::new();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(addr, state.clone(), shutdown.clone()));

        let client = reqwest::Client::new();
        let mut health = None;
        for _ in 0..50 {
            match client.get(format!("http://{}/health", addr)).send().await {
                Ok(resp) => {
                    health = Some(resp);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        let health: serde_json::Value = health.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let window = client
            .get(format!("http://{}/api/v1/window", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(window.status(), reqwest::StatusCode::NOT_FOUND);

        let metrics = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert!(metrics.status().is_success());

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
