use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;

/// HTTP routes: health probe and metrics snapshot.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/metrics", get(api::metrics))
        .layer(TraceLayer::new_for_http())
}
