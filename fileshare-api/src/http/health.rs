//! Health check endpoints

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/progress", get(progress_status))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct ProgressStatus {
    pub active_channels: usize,
    pub sweep_running: bool,
}

/// Notification channel registry status
pub async fn progress_status(State(state): State<AppState>) -> Json<ProgressStatus> {
    Json(ProgressStatus {
        active_channels: state.registry.len(),
        sweep_running: state.registry.is_running(),
    })
}
