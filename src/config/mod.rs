//! Configuration module for the voice bridge server.
//!
//! Configuration comes from environment variables (a `.env` file is loaded
//! by `main` before this runs). Required credentials are validated up
//! front: the server refuses to start without them.
//!
//! # Example
//! ```rust,no_run
//! use voicebridge::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use crate::errors::{BridgeError, BridgeResult};
use crate::utils;

/// Default listen port when `PORT` is not set.
const DEFAULT_PORT: u16 = 8000;

/// Server configuration.
///
/// Contains everything needed to run the bridge:
/// - Server settings (host, port, public URL for TwiML callbacks)
/// - Agent provider credentials (ElevenLabs API key + agent id)
/// - Telephony provider credentials (Twilio account, token, caller number)
/// - Calendar backend API key (optional; booking tools degrade to error
///   envelopes without it)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// Public host this server is reachable at. Used to build the answer
    /// URL handed to Twilio and the `wss://` stream URL in TwiML.
    pub public_host: String,

    // Agent provider (ElevenLabs Conversational AI)
    pub elevenlabs_api_key: String,
    pub elevenlabs_agent_id: String,

    // Telephony provider (Twilio)
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,

    /// Cal.com API key for the booking tools.
    pub cal_com_api_key: Option<String>,

    /// Deployment environment label (`NODE_ENV` convention kept for parity
    /// with the deployment platform).
    pub environment: String,
}

impl ServerConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// `from_env` goes through here; tests inject their own lookup instead
    /// of mutating process-global environment state.
    pub fn from_lookup<F>(lookup: F) -> BridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> BridgeResult<String> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(BridgeError::ConfigurationMissing(key.to_string())),
            }
        };

        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                BridgeError::ConfigurationMissing(format!("PORT (invalid value: {raw})"))
            })?,
            None => DEFAULT_PORT,
        };

        let public_host = lookup("PUBLIC_URL")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup("RAILWAY_PUBLIC_DOMAIN").filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            public_host,
            elevenlabs_api_key: required("ELEVENLABS_API_KEY")?,
            elevenlabs_agent_id: required("ELEVENLABS_AGENT_ID")?,
            twilio_account_sid: required("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: required("TWILIO_AUTH_TOKEN")?,
            twilio_phone_number: required("TWILIO_PHONE_NUMBER")?,
            cal_com_api_key: lookup("CAL_COM_API_KEY").filter(|v| !v.trim().is_empty()),
            environment: lookup("NODE_ENV").unwrap_or_else(|| "development".to_string()),
        };

        Ok(config)
    }

    /// Socket address string for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public `https://` base URL for HTTP callbacks.
    pub fn public_base_url(&self) -> String {
        utils::public_base_url(&self.public_host)
    }

    /// Public `wss://` base URL for media-stream TwiML.
    pub fn public_ws_url(&self) -> String {
        utils::public_ws_url(&self.public_host)
    }
}
