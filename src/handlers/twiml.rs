//! TwiML answer-URL handlers.
//!
//! Twilio fetches these when a call is answered; the response connects the
//! call's media stream to the matching WebSocket endpoint on this server.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::core::twilio::twiml;
use crate::state::AppState;

/// Query parameters of the outbound answer URL.
#[derive(Debug, Default, Deserialize)]
pub struct OutboundTwimlQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(rename = "airtableRecordId", default)]
    pub airtable_record_id: Option<String>,
    /// Legacy JSON blob of extra parameters, passed through opaquely
    #[serde(rename = "customParams", default)]
    pub custom_params: Option<String>,
}

fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Answer URL for outbound calls: stream to `/outbound-media-stream` with
/// the customer parameters attached.
pub async fn outbound_call_twiml(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OutboundTwimlQuery>,
) -> Response {
    let ws_url = format!("{}/outbound-media-stream", state.config.public_ws_url());

    let name = query.name.unwrap_or_default();
    let number = query.number.unwrap_or_default();
    let record_id = query.airtable_record_id.unwrap_or_default();
    let custom_params = query.custom_params.unwrap_or_default();

    let parameters = [
        ("name", name.as_str()),
        ("number", number.as_str()),
        ("airtableRecordId", record_id.as_str()),
        ("customParams", custom_params.as_str()),
    ];

    xml_response(twiml::stream_twiml(&ws_url, &parameters))
}

/// Answer URL for inbound calls: stream to `/media-stream`.
pub async fn inbound_call_twiml(State(state): State<Arc<AppState>>) -> Response {
    let ws_url = format!("{}/media-stream", state.config.public_ws_url());
    xml_response(twiml::stream_twiml(&ws_url, &[]))
}
