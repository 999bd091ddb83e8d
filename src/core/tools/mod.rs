//! Tool-call proxy: the agent's tool requests are executed here and
//! answered with result envelopes on the agent WebSocket.

pub mod calendar;
pub mod dispatch;

pub use calendar::{CalComBackend, CalendarBackend, DEFAULT_TIME_ZONE, SlotsQuery};
pub use dispatch::{TOOL_TIMEOUT, ToolDispatcher, ToolOutcome, is_hangup_tool};
