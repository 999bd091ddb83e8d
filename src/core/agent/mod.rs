//! Conversational-agent provider surface: signed-URL prewarming, the
//! WebSocket session factory, and the wire message types.

pub mod config;
pub mod messages;
pub mod session;
pub mod signed_url;

pub use config::{
    AGENT_CONNECT_TIMEOUT, AGENT_OPEN_TIMEOUT, DEFAULT_CACHE_TARGET, MAX_CACHE_TARGET,
    SIGNED_URL_TTL,
};
pub use messages::{
    AgentEvent, ClientEvent, ConversationConfigOverride, ConversationInitiation, ToolCallRequest,
};
pub use session::{AgentCommand, AgentHandle, connect};
pub use signed_url::SignedUrlCache;
