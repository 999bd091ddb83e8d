//! Endpoints, timeouts, and audio constants for the conversational agent.

use std::time::Duration;

/// Signed-URL minting endpoint.
pub const SIGNED_URL_ENDPOINT: &str =
    "https://api.elevenlabs.io/v1/convai/conversation/get-signed-url";

/// Signed URLs are only handed out while younger than this.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(300);

/// Bound on the agent WebSocket connect handshake.
pub const AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a started call waits for the agent socket to open.
pub const AGENT_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of prewarmed signed URLs.
pub const DEFAULT_CACHE_TARGET: usize = 3;

/// Upper bound the predictor can scale the cache to.
pub const MAX_CACHE_TARGET: usize = 10;

/// Audio encoding the telephony leg produces and consumes.
pub const AUDIO_ENCODING: &str = "ulaw";

/// Telephony sample rate in Hz.
pub const AUDIO_SAMPLE_RATE: u32 = 8000;

/// Channel capacity for agent WebSocket plumbing.
pub const AGENT_CHANNEL_CAPACITY: usize = 256;
