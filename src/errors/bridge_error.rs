//! Error taxonomy for the voice bridge.
//!
//! Every fallible layer in the bridge maps into [`BridgeError`]: setup
//! failures surface to the HTTP initiator, mid-session failures terminate
//! the session without touching the initiator (the telephony status
//! callback reflects completion).

use thiserror::Error;

/// Errors that can occur across the bridge lifecycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Required environment variable absent at startup. Fatal.
    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(String),

    /// Signed-URL acquisition rejected by the agent provider.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// Agent WebSocket connect or open failed.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Unparseable frame on either WebSocket. Logged and dropped.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A bounded operation exceeded its budget.
    #[error("Operation timed out: {0}")]
    TimeoutExceeded(String),

    /// The other WebSocket closed cleanly.
    #[error("Peer closed")]
    PeerClosed,

    /// Tool call missing a required field.
    #[error("Missing required parameter: {0}")]
    MissingRequiredParameter(String),

    /// Calendar backend returned a non-2xx response.
    #[error("Backend failure ({status}): {body}")]
    BackendFailure { status: u16, body: String },

    /// Telephony provider REST call failed.
    #[error("Telephony provider error: {0}")]
    TelcoFailure(String),

    /// Frame could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Whether this error should tear the session down (as opposed to
    /// being reported and survived, like a dropped frame or a failed
    /// tool dispatch).
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            BridgeError::AgentUnavailable(_)
                | BridgeError::PeerClosed
                | BridgeError::TimeoutExceeded(_)
        )
    }
}
