//! HTTP API handlers.

use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::core::llm::BackendHealth;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status
    pub status: String,
    /// Backend status: "healthy" or "unhealthy"
    pub backend: String,
}

/// Health check handler. The server itself answering is "ok"; the backend
/// field reflects the supervisor's gate.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let backend = if state.supervisor.is_healthy() {
        "healthy"
    } else {
        "unhealthy"
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: backend.to_string(),
    })
}

/// Aggregate runtime snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub active_sessions: usize,
    pub backend_state: String,
    pub backend_restarts: u32,
}

/// Metrics handler; per-turn latencies are logged per session.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let health: BackendHealth = state.supervisor.health();
    Json(MetricsResponse {
        active_sessions: state.active_sessions(),
        backend_state: health.as_str().to_string(),
        backend_restarts: state.supervisor.restart_count(),
    })
}
