//! Tool-call dispatcher.
//!
//! The agent requests tool invocations over its WebSocket; the dispatcher
//! executes them and produces the result envelope the session sends back.
//! A failed or slow tool never tears the session down: every failure path
//! becomes an `is_error` envelope.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::timeout;

use super::calendar::{CalendarBackend, SlotsQuery};
use crate::core::agent::ToolCallRequest;
use crate::errors::BridgeError;

/// Hard budget for any outbound call a tool makes.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tools that end the call once acknowledged.
pub fn is_hangup_tool(tool_name: &str) -> bool {
    matches!(tool_name, "end_call" | "end_voicemail_call")
}

/// Result envelope payload for one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// JSON-encoded result string
    pub result: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(value: Value) -> Self {
        Self {
            result: value.to_string(),
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            result: json!({ "error": message.into() }).to_string(),
            is_error: true,
        }
    }
}

/// Executes the closed set of tools the agent is allowed to call.
pub struct ToolDispatcher {
    backend: Option<Arc<dyn CalendarBackend>>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    /// `backend` is `None` when no calendar API key is configured; the
    /// booking tools then return error envelopes instead of panicking.
    pub fn new(backend: Option<Arc<dyn CalendarBackend>>) -> Self {
        Self {
            backend,
            tool_timeout: TOOL_TIMEOUT,
        }
    }

    /// Shrink the timeout. Test hook.
    #[cfg(test)]
    pub fn with_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    /// Execute one tool call and produce its envelope.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolOutcome {
        tracing::info!(
            tool = %request.tool_name,
            tool_call_id = %request.tool_call_id,
            "Dispatching tool call"
        );

        match request.tool_name.as_str() {
            "get_current_time" => ToolOutcome::ok(json!({
                "current_time": Utc::now().to_rfc3339(),
                "timezone": "UTC",
            })),

            "get_available_slots" => self.available_slots(&request.parameters).await,

            "book_meeting" => self.book_meeting(&request.parameters).await,

            "end_call" => ToolOutcome::ok(json!({
                "success": true,
                "message": "Call will be ended",
            })),

            "end_voicemail_call" => ToolOutcome::ok(json!({
                "success": true,
                "message": "Voicemail delivered, call will be ended",
            })),

            other => {
                tracing::warn!(tool = other, "Unknown tool requested");
                ToolOutcome::error(format!("Unknown tool: {other}"))
            }
        }
    }

    async fn available_slots(&self, parameters: &Value) -> ToolOutcome {
        let query = match SlotsQuery::from_parameters(parameters) {
            Ok(q) => q,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };

        let Some(backend) = &self.backend else {
            return ToolOutcome::error("Calendar backend is not configured");
        };

        match timeout(self.tool_timeout, backend.available_slots(&query)).await {
            Ok(Ok(value)) => ToolOutcome::ok(value),
            Ok(Err(e)) => self.backend_error("get_available_slots", e),
            Err(_) => self.timed_out("get_available_slots"),
        }
    }

    async fn book_meeting(&self, parameters: &Value) -> ToolOutcome {
        let Some(backend) = &self.backend else {
            return ToolOutcome::error("Calendar backend is not configured");
        };

        match timeout(self.tool_timeout, backend.book(parameters)).await {
            Ok(Ok(value)) => ToolOutcome::ok(value),
            Ok(Err(e)) => self.backend_error("book_meeting", e),
            Err(_) => self.timed_out("book_meeting"),
        }
    }

    fn backend_error(&self, tool: &str, error: BridgeError) -> ToolOutcome {
        tracing::warn!(tool, "Tool backend failure: {error}");
        ToolOutcome::error(error.to_string())
    }

    fn timed_out(&self, tool: &str) -> ToolOutcome {
        tracing::warn!(tool, "Tool call timed out");
        ToolOutcome::error(format!(
            "{tool} timed out after {}s",
            self.tool_timeout.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::errors::BridgeResult;

    struct MockBackend {
        slots_response: BridgeResult<Value>,
        delay: Duration,
        last_query: Mutex<Option<SlotsQuery>>,
    }

    impl MockBackend {
        fn ok(value: Value) -> Self {
            Self {
                slots_response: Ok(value),
                delay: Duration::ZERO,
                last_query: Mutex::new(None),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                slots_response: Ok(json!({})),
                delay,
                last_query: Mutex::new(None),
            }
        }

        fn failing(status: u16, body: &str) -> Self {
            Self {
                slots_response: Err(BridgeError::BackendFailure {
                    status,
                    body: body.to_string(),
                }),
                delay: Duration::ZERO,
                last_query: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CalendarBackend for MockBackend {
        async fn available_slots(&self, query: &SlotsQuery) -> BridgeResult<Value> {
            *self.last_query.lock().await = Some(query.clone());
            tokio::time::sleep(self.delay).await;
            match &self.slots_response {
                Ok(v) => Ok(v.clone()),
                Err(BridgeError::BackendFailure { status, body }) => {
                    Err(BridgeError::BackendFailure {
                        status: *status,
                        body: body.clone(),
                    })
                }
                Err(_) => unreachable!(),
            }
        }

        async fn book(&self, _booking: &Value) -> BridgeResult<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(json!({"status": "booked"}))
        }
    }

    fn request(tool_name: &str, parameters: Value) -> ToolCallRequest {
        ToolCallRequest {
            tool_name: tool_name.to_string(),
            tool_call_id: "t1".to_string(),
            parameters,
        }
    }

    #[tokio::test]
    async fn test_get_current_time() {
        let dispatcher = ToolDispatcher::new(None);
        let outcome = dispatcher
            .dispatch(&request("get_current_time", Value::Null))
            .await;

        assert!(!outcome.is_error);
        let parsed: Value = serde_json::from_str(&outcome.result).unwrap();
        assert_eq!(parsed["timezone"], "UTC");
        assert!(parsed["current_time"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_slots_success_passes_query_through() {
        let backend = Arc::new(MockBackend::ok(json!({"slots": {"2025-02-01": []}})));
        let dispatcher = ToolDispatcher::new(Some(backend.clone()));

        let outcome = dispatcher
            .dispatch(&request(
                "get_available_slots",
                json!({"eventTypeId": "2171540", "start": "2025-02-01", "timeZone": "Australia/Perth"}),
            ))
            .await;

        assert!(!outcome.is_error);
        assert!(outcome.result.contains("2025-02-01"));

        let query = backend.last_query.lock().await.clone().unwrap();
        assert_eq!(query.end, "2025-02-01");
        assert_eq!(query.time_zone, "Australia/Perth");
    }

    #[tokio::test]
    async fn test_slots_missing_event_type_id() {
        let dispatcher = ToolDispatcher::new(Some(Arc::new(MockBackend::ok(json!({})))));
        let outcome = dispatcher
            .dispatch(&request("get_available_slots", json!({"start": "2025-02-01"})))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.result.contains("eventTypeId"));
    }

    #[tokio::test]
    async fn test_slots_timeout_mentions_timed_out() {
        let backend = Arc::new(MockBackend::slow(Duration::from_millis(200)));
        let dispatcher =
            ToolDispatcher::new(Some(backend)).with_timeout(Duration::from_millis(10));

        let outcome = dispatcher
            .dispatch(&request(
                "get_available_slots",
                json!({"eventTypeId": "1", "start": "2025-02-01"}),
            ))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.result.contains("timed out"));
    }

    #[tokio::test]
    async fn test_backend_failure_has_body_preview() {
        let backend = Arc::new(MockBackend::failing(502, "upstream exploded"));
        let dispatcher = ToolDispatcher::new(Some(backend));

        let outcome = dispatcher
            .dispatch(&request(
                "get_available_slots",
                json!({"eventTypeId": "1", "start": "2025-02-01"}),
            ))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.result.contains("502"));
        assert!(outcome.result.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_missing_backend_is_error_envelope() {
        let dispatcher = ToolDispatcher::new(None);
        let outcome = dispatcher
            .dispatch(&request(
                "get_available_slots",
                json!({"eventTypeId": "1", "start": "2025-02-01"}),
            ))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.result.contains("not configured"));
    }

    #[tokio::test]
    async fn test_hangup_tools_acknowledge() {
        let dispatcher = ToolDispatcher::new(None);

        let end_call = dispatcher.dispatch(&request("end_call", Value::Null)).await;
        assert!(!end_call.is_error);

        let end_vm = dispatcher
            .dispatch(&request("end_voicemail_call", Value::Null))
            .await;
        assert!(!end_vm.is_error);
        assert!(end_vm.result.contains("Voicemail"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dispatcher = ToolDispatcher::new(None);
        let outcome = dispatcher
            .dispatch(&request("reboot_the_moon", Value::Null))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.result.contains("Unknown tool"));
    }

    #[test]
    fn test_hangup_classification() {
        assert!(is_hangup_tool("end_call"));
        assert!(is_hangup_tool("end_voicemail_call"));
        assert!(!is_hangup_tool("get_current_time"));
    }
}
