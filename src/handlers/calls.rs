//! Call-control HTTP handlers.
//!
//! `/outbound-call` places a call through the telephony provider,
//! `/end-call` finalizes one, `/call-status` receives the provider's
//! lifecycle and AMD callbacks, and `/optimization-status` exposes a
//! snapshot of the latency machinery.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::core::twilio::{AmdClassification, MACHINE_FINALIZE_DELAY};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

// =============================================================================
// /outbound-call
// =============================================================================

/// Body of `POST /outbound-call`.
#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(rename = "airtableRecordId", default)]
    pub airtable_record_id: Option<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: Option<HashMap<String, String>>,
}

/// Place an outbound call. The answer URL points Twilio back at our TwiML
/// endpoint, which connects the call's media stream to this server.
pub async fn outbound_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OutboundCallRequest>,
) -> AppResult<Json<Value>> {
    let number = request
        .number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("number is required"))?;
    let name = request.name.unwrap_or_else(|| "there".to_string());

    // Overlap signed-URL acquisition with ringing.
    state.predictor.record_call().await;
    let cache = state.signed_urls.clone();
    tokio::spawn(async move {
        cache.prewarm().await;
    });

    let answer_url = build_twiml_url(
        &state.config.public_base_url(),
        &name,
        &number,
        request.airtable_record_id.as_deref(),
        request.custom_parameters.as_ref(),
    )
    .map_err(AppError::internal)?;
    let status_callback = format!("{}/call-status", state.config.public_base_url());

    let call_sid = state
        .twilio
        .create_call(&number, answer_url.as_str(), &status_callback)
        .await
        .map_err(|e| AppError::internal(format!("Failed to initiate call: {e}")))?;

    tracing::info!(call_sid, number, "Outbound call initiated");

    Ok(Json(json!({
        "success": true,
        "callSid": call_sid,
        "customerName": name,
        "optimizations": {
            "prewarmedUrls": state.signed_urls.cached_count().await,
            "cacheTarget": state.signed_urls.target(),
            "predictedNextTwoHours": state.predictor.predicted_next_two_hours().await,
        },
    })))
}

fn build_twiml_url(
    base: &str,
    name: &str,
    number: &str,
    airtable_record_id: Option<&str>,
    custom_parameters: Option<&HashMap<String, String>>,
) -> Result<Url, String> {
    let mut url = Url::parse(&format!("{base}/outbound-call-twiml"))
        .map_err(|e| format!("invalid public URL: {e}"))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("name", name);
        query.append_pair("number", number);
        if let Some(record_id) = airtable_record_id {
            query.append_pair("airtableRecordId", record_id);
        }
        if let Some(params) = custom_parameters
            && !params.is_empty()
        {
            let encoded = serde_json::to_string(params).unwrap_or_default();
            query.append_pair("customParams", &encoded);
        }
    }

    Ok(url)
}

// =============================================================================
// /end-call
// =============================================================================

/// Body of `POST /end-call`.
#[derive(Debug, Deserialize)]
pub struct EndCallRequest {
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
}

/// Finalize a call. Ending an already-completed call succeeds.
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EndCallRequest>,
) -> AppResult<Json<Value>> {
    let call_sid = request
        .call_sid
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("callSid is required"))?;

    state
        .finalize_call(&call_sid)
        .await
        .map_err(|e| AppError::internal(format!("Failed to end call: {e}")))?;

    Ok(Json(json!({ "success": true })))
}

// =============================================================================
// /call-status
// =============================================================================

/// Form fields of the telephony status callback.
#[derive(Debug, Deserialize)]
pub struct CallStatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus", default)]
    pub call_status: Option<String>,
    #[serde(rename = "AnsweredBy", default)]
    pub answered_by: Option<String>,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

/// Receive a status callback. Machine classifications are parked in the
/// AMD registry and armed with a watchdog that finalizes the call even if
/// no session ever binds to it.
pub async fn call_status(
    State(state): State<Arc<AppState>>,
    Form(callback): Form<CallStatusCallback>,
) -> StatusCode {
    tracing::info!(
        call_sid = %callback.call_sid,
        status = ?callback.call_status,
        answered_by = ?callback.answered_by,
        duration = ?callback.call_duration,
        "Call status callback"
    );

    if let Some(answered_by) = &callback.answered_by {
        let classification = AmdClassification::from_answered_by(answered_by);
        if classification.is_machine() {
            let recorded = state.amd.record(&callback.call_sid, classification).await;
            if recorded {
                let state = state.clone();
                let call_sid = callback.call_sid.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(MACHINE_FINALIZE_DELAY).await;
                    match state.finalize_call(&call_sid).await {
                        Ok(true) => {
                            tracing::info!(call_sid, "Machine watchdog finalized call")
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(call_sid, "Machine watchdog finalize failed: {e}")
                        }
                    }
                });
            }
        }
    }

    StatusCode::OK
}

// =============================================================================
// /optimization-status and health
// =============================================================================

/// Snapshot of the latency machinery.
pub async fn optimization_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "signedUrlCache": {
            "cached": state.signed_urls.cached_count().await,
            "target": state.signed_urls.target(),
        },
        "amdRegistry": {
            "pending": state.amd.pending_count().await,
        },
        "predictor": {
            "callsLast24h": state.predictor.calls_last_24h().await,
            "predictedNextTwoHours": state.predictor.predicted_next_two_hours().await,
            "recommendedCacheTarget": state.predictor.recommended_cache_target().await,
        },
        "activeSessions": state.active_session_count(),
    }))
}

/// Liveness probe.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "message": "Server is running" }))
}
