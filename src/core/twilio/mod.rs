//! Telephony provider surface: REST call control, TwiML generation,
//! media-stream frame types, and AMD correlation state.

pub mod amd;
pub mod client;
pub mod messages;
pub mod twiml;

pub use amd::{AmdClassification, AmdRegistry, ENTRY_TTL, MACHINE_FINALIZE_DELAY};
pub use client::TwilioClient;
pub use messages::{StartMeta, StreamInbound, StreamOutbound};
