//! Twilio REST client.
//!
//! Covers the two call-control operations the bridge needs: placing an
//! outbound call with answering-machine detection armed, and finalizing a
//! call. Authentication is HTTP basic with the account SID and auth token.

use serde_json::Value;

use crate::errors::{BridgeError, BridgeResult};

/// Twilio REST API base.
const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Error code Twilio returns when updating a call that is no longer
/// in progress. Treated as success so finalization is idempotent.
const ERR_CALL_NOT_IN_PROGRESS: &str = "21220";

/// Minimal Twilio REST client for call control.
#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioClient {
    /// Create a client against the production Twilio API.
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: TWILIO_API_BASE.to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
        }
    }

    /// Override the API base URL. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The caller-id number calls are placed from.
    pub fn from_number(&self) -> &str {
        &self.from_number
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }

    /// Place an outbound call.
    ///
    /// `answer_url` is fetched by Twilio when the callee answers and must
    /// return TwiML. `status_callback` receives lifecycle and AMD events.
    /// Returns the new call SID.
    pub async fn create_call(
        &self,
        to: &str,
        answer_url: &str,
        status_callback: &str,
    ) -> BridgeResult<String> {
        let form = [
            ("To", to),
            ("From", self.from_number.as_str()),
            ("Url", answer_url),
            ("Method", "POST"),
            ("StatusCallback", status_callback),
            ("StatusCallbackMethod", "POST"),
            ("MachineDetection", "Enable"),
            ("AsyncAmd", "true"),
            ("AsyncAmdStatusCallback", status_callback),
            ("AsyncAmdStatusCallbackMethod", "POST"),
        ];

        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| BridgeError::TelcoFailure(format!("create call request: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::TelcoFailure(format!("create call response: {e}")))?;

        if !status.is_success() {
            return Err(BridgeError::TelcoFailure(format!(
                "create call rejected ({}): {}",
                status,
                body["message"].as_str().unwrap_or("unknown error")
            )));
        }

        body["sid"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BridgeError::TelcoFailure("create call response missing sid".into()))
    }

    /// Finalize a call by updating its status to `completed`.
    ///
    /// Finalizing a call that already ended is a success: Twilio reports
    /// error 21220 for that case and we swallow it.
    pub async fn complete_call(&self, call_sid: &str) -> BridgeResult<()> {
        let response = self
            .http
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| BridgeError::TelcoFailure(format!("complete call request: {e}")))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            tracing::info!(call_sid, "Call finalized");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_already_completed(status, &body) {
            tracing::debug!(call_sid, "Call already completed");
            return Ok(());
        }

        Err(BridgeError::TelcoFailure(format!(
            "complete call rejected ({status}): {body}"
        )))
    }
}

/// Classify Twilio's "call is not in progress" rejection as benign.
fn is_already_completed(status: u16, body: &str) -> bool {
    status == 400 && (body.contains(ERR_CALL_NOT_IN_PROGRESS) || body.contains("not in-progress"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TwilioClient {
        TwilioClient::new("AC123", "token", "+15550001111")
    }

    #[test]
    fn test_calls_url() {
        assert_eq!(
            client().calls_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Calls.json"
        );
    }

    #[test]
    fn test_call_url_embeds_sid() {
        assert_eq!(
            client().call_url("CA9"),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Calls/CA9.json"
        );
    }

    #[test]
    fn test_base_url_override() {
        let c = client().with_base_url("http://127.0.0.1:4010");
        assert!(c.calls_url().starts_with("http://127.0.0.1:4010/"));
    }

    #[test]
    fn test_already_completed_classification() {
        assert!(is_already_completed(
            400,
            r#"{"code": 21220, "message": "Call is not in-progress"}"#
        ));
        assert!(is_already_completed(400, "Call is not in-progress"));
        assert!(!is_already_completed(400, "Invalid phone number"));
        assert!(!is_already_completed(500, "21220"));
    }
}
