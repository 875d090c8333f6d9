use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// Create the WebSocket router.
///
/// The voice endpoint is unauthenticated: connections are short-lived, the
/// audio is ephemeral, and deployments are expected to sit behind a reverse
/// proxy if exposure demands auth.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/audio", get(ws::ws_audio_handler))
        .layer(TraceLayer::new_for_http())
}
