use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use log::info;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::tracker::ingest::IngestionBridge;
use crate::tracker::registry::SubscriberRegistry;
use crate::tracker::scheduler::WindowScheduler;
use crate::tracker::shutdown::ShutdownListener;

/// Read-only handles into the running tracker
#[derive(Clone)]
pub struct StatusState {
    pub scheduler: Arc<WindowScheduler>,
    pub registry: Arc<SubscriberRegistry>,
    pub bridge: Arc<IngestionBridge>,
}

pub struct StatusServer {
    state: StatusState,
}

impl StatusServer {
    pub fn new(state: StatusState) -> Self {
        Self { state }
    }

    /// Serve until shutdown
    pub async fn start_server(&self, port: u16, mut shutdown: ShutdownListener) -> Result<()> {
        let app = self.create_routes();

        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
            .await
            .with_context(|| format!("Failed to bind status API to port {}", port))?;
        info!("Status API available at http://localhost:{}/api/status", port);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
            .context("Status API server failed")?;
        info!("Status API stopped");
        Ok(())
    }

    fn create_routes(&self) -> Router {
        Router::new()
            .route("/api/status", get(get_status))
            .route("/api/latest", get(get_latest))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

async fn get_status(State(state): State<StatusState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let ingest = state.bridge.stats();
    Ok(Json(serde_json::json!({
        "success": true,
        "data": {
            "status": "running",
            "timestamp": chrono::Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
            "window_seconds": state.scheduler.interval().as_secs(),
            "windows_emitted": state.scheduler.windows_emitted(),
            "subscribers": state.registry.len().await,
            "dropped_deliveries": state.registry.total_dropped(),
            "messages_seen": ingest.messages_seen,
            "lagged_messages": ingest.lagged,
        }
    })))
}

async fn get_latest(State(state): State<StatusState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let latest = state.scheduler.latest().await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": latest
    })))
}
