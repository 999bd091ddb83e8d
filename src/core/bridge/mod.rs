//! The per-call session bridge: state machine, buffering, init handshake,
//! and the prompt material for the two call flows.

pub mod prompts;
pub mod session;

pub use session::{AUDIO_BUFFER_CAP, CallDirection, Session, SessionMode, SessionState};

use std::time::Duration;

/// Watchdog bound for a voicemail session: the agent is expected to
/// deliver the message and tool-call the hangup well inside this.
pub const VOICEMAIL_WATCHDOG: Duration = Duration::from_secs(30);

/// Grace period between acknowledging a hangup tool and closing, so the
/// result envelope and any trailing audio flush first.
pub const HANGUP_GRACE: Duration = Duration::from_secs(1);
