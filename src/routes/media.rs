//! Media-stream WebSocket route configuration.

use axum::{Router, routing::any};
use tower_http::trace::TraceLayer;

use crate::handlers::media;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream router.
///
/// # Endpoints
///
/// - `/outbound-media-stream` - WebSocket upgrade for outbound calls
/// - `/media-stream` - WebSocket upgrade for inbound calls
///
/// Twilio sends the upgrade as a GET; `any` keeps us lenient about the
/// method while the upgrade header does the real gating.
pub fn create_media_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/outbound-media-stream", any(media::outbound_media_stream))
        .route("/media-stream", any(media::inbound_media_stream))
        .layer(TraceLayer::new_for_http())
}
