//! HTTP route configuration.

use axum::{
    Router,
    routing::{any, get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{calls, twiml};
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router.
///
/// Call control:
/// - `POST /outbound-call` - place a call
/// - `POST /end-call` - finalize a call
/// - `POST /call-status` - telephony status + AMD callbacks
/// - `GET /optimization-status` - latency machinery snapshot
///
/// TwiML answer URLs (Twilio fetches these with GET or POST):
/// - `/outbound-call-twiml`
/// - `/incoming-call-eleven` and `/twilio/inbound_call`
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/outbound-call", post(calls::outbound_call))
        .route("/end-call", post(calls::end_call))
        .route("/call-status", post(calls::call_status))
        .route("/optimization-status", get(calls::optimization_status))
        .route("/outbound-call-twiml", any(twiml::outbound_call_twiml))
        .route("/incoming-call-eleven", any(twiml::inbound_call_twiml))
        .route("/twilio/inbound_call", any(twiml::inbound_call_twiml))
        .layer(TraceLayer::new_for_http())
}
