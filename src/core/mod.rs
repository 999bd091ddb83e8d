pub mod agent;
pub mod bridge;
pub mod predictor;
pub mod tools;
pub mod twilio;

// Re-export commonly used types for convenience
pub use agent::{AgentEvent, AgentHandle, ClientEvent, SignedUrlCache, ToolCallRequest};
pub use bridge::{CallDirection, Session, SessionMode, SessionState};
pub use predictor::CallRatePredictor;
pub use tools::{CalComBackend, CalendarBackend, ToolDispatcher, ToolOutcome};
pub use twilio::{AmdClassification, AmdRegistry, TwilioClient};
