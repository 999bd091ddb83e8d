//! Calendar backend for the booking tools.
//!
//! The dispatcher talks to the backend through the [`CalendarBackend`]
//! trait so tests can substitute a mock; production uses [`CalComBackend`]
//! against the Cal.com v2 API.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{BridgeError, BridgeResult};
use crate::utils;

/// Cal.com API base.
const CAL_COM_API_BASE: &str = "https://api.cal.com";

/// Timezone used when the caller's is missing or malformed.
pub const DEFAULT_TIME_ZONE: &str = "Australia/Brisbane";

/// Validated query for `get_available_slots`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotsQuery {
    pub event_type_id: String,
    pub start: String,
    pub end: String,
    pub time_zone: String,
}

impl SlotsQuery {
    /// Validate raw tool parameters into a query.
    ///
    /// `eventTypeId` is required. `start` defaults to today (UTC) and must
    /// be `YYYY-MM-DD`; `end` defaults to `start`. A missing or malformed
    /// `timeZone` falls back to [`DEFAULT_TIME_ZONE`].
    pub fn from_parameters(parameters: &Value) -> BridgeResult<Self> {
        let event_type_id = parameters
            .get("eventTypeId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BridgeError::MissingRequiredParameter("eventTypeId".to_string()))?
            .to_string();

        let start = match parameters.get("start").and_then(Value::as_str) {
            Some(s) if utils::is_valid_date(s) => s.to_string(),
            Some(s) => {
                return Err(BridgeError::MissingRequiredParameter(format!(
                    "start must be YYYY-MM-DD, got {s:?}"
                )));
            }
            None => utils::today(),
        };

        let end = match parameters.get("end").and_then(Value::as_str) {
            Some(s) if utils::is_valid_date(s) => s.to_string(),
            Some(s) => {
                return Err(BridgeError::MissingRequiredParameter(format!(
                    "end must be YYYY-MM-DD, got {s:?}"
                )));
            }
            None => start.clone(),
        };

        let time_zone = parameters
            .get("timeZone")
            .and_then(Value::as_str)
            .filter(|tz| is_plausible_time_zone(tz))
            .unwrap_or(DEFAULT_TIME_ZONE)
            .to_string();

        Ok(Self {
            event_type_id,
            start,
            end,
            time_zone,
        })
    }
}

/// Cheap structural check for an IANA-style `Area/Location` name.
fn is_plausible_time_zone(tz: &str) -> bool {
    tz.contains('/')
        && !tz.starts_with('/')
        && !tz.ends_with('/')
        && tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '+' | '-'))
}

/// Seam to the scheduling system.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Look up open slots for an event type.
    async fn available_slots(&self, query: &SlotsQuery) -> BridgeResult<Value>;

    /// Create a booking from the raw tool parameters.
    async fn book(&self, booking: &Value) -> BridgeResult<Value>;
}

/// Cal.com v2 implementation.
pub struct CalComBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CalComBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: CAL_COM_API_BASE.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Override the API base URL. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn read_json(response: reqwest::Response) -> BridgeResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(BridgeError::BackendFailure {
                status: status.as_u16(),
                body: preview,
            });
        }
        response
            .json()
            .await
            .map_err(|e| BridgeError::BackendFailure {
                status: status.as_u16(),
                body: format!("invalid JSON body: {e}"),
            })
    }
}

#[async_trait]
impl CalendarBackend for CalComBackend {
    async fn available_slots(&self, query: &SlotsQuery) -> BridgeResult<Value> {
        let response = self
            .http
            .get(format!("{}/v2/slots", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[
                ("eventTypeId", query.event_type_id.as_str()),
                ("start", query.start.as_str()),
                ("end", query.end.as_str()),
                ("timeZone", query.time_zone.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BridgeError::BackendFailure {
                status: 0,
                body: format!("slots request: {e}"),
            })?;

        Self::read_json(response).await
    }

    async fn book(&self, booking: &Value) -> BridgeResult<Value> {
        let response = self
            .http
            .post(format!("{}/v2/bookings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(booking)
            .send()
            .await
            .map_err(|e| BridgeError::BackendFailure {
                status: 0,
                body: format!("booking request: {e}"),
            })?;

        Self::read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_query_parses() {
        let query = SlotsQuery::from_parameters(&json!({
            "eventTypeId": "2171540",
            "start": "2025-02-01",
            "end": "2025-02-07",
            "timeZone": "Australia/Perth"
        }))
        .unwrap();

        assert_eq!(query.event_type_id, "2171540");
        assert_eq!(query.start, "2025-02-01");
        assert_eq!(query.end, "2025-02-07");
        assert_eq!(query.time_zone, "Australia/Perth");
    }

    #[test]
    fn test_event_type_id_is_required() {
        let err = SlotsQuery::from_parameters(&json!({"start": "2025-02-01"})).unwrap_err();
        match err {
            BridgeError::MissingRequiredParameter(field) => assert_eq!(field, "eventTypeId"),
            other => panic!("Expected MissingRequiredParameter, got {other:?}"),
        }
    }

    #[test]
    fn test_end_defaults_to_start() {
        let query = SlotsQuery::from_parameters(&json!({
            "eventTypeId": "1",
            "start": "2025-02-01"
        }))
        .unwrap();
        assert_eq!(query.end, "2025-02-01");
    }

    #[test]
    fn test_malformed_dates_rejected() {
        assert!(
            SlotsQuery::from_parameters(&json!({
                "eventTypeId": "1",
                "start": "Feb 1st"
            }))
            .is_err()
        );
        assert!(
            SlotsQuery::from_parameters(&json!({
                "eventTypeId": "1",
                "start": "2025-02-01",
                "end": "2025-2-7"
            }))
            .is_err()
        );
    }

    #[test]
    fn test_time_zone_defaults() {
        let missing = SlotsQuery::from_parameters(&json!({
            "eventTypeId": "1",
            "start": "2025-02-01"
        }))
        .unwrap();
        assert_eq!(missing.time_zone, DEFAULT_TIME_ZONE);

        let malformed = SlotsQuery::from_parameters(&json!({
            "eventTypeId": "1",
            "start": "2025-02-01",
            "timeZone": "brisbane time"
        }))
        .unwrap();
        assert_eq!(malformed.time_zone, DEFAULT_TIME_ZONE);
    }

    #[test]
    fn test_time_zone_plausibility() {
        assert!(is_plausible_time_zone("Australia/Brisbane"));
        assert!(is_plausible_time_zone("America/New_York"));
        assert!(is_plausible_time_zone("Etc/GMT+10"));
        assert!(!is_plausible_time_zone("UTC"));
        assert!(!is_plausible_time_zone("/Brisbane"));
        assert!(!is_plausible_time_zone("not a zone"));
    }
}
