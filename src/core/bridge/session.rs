//! Per-call bridge session.
//!
//! One [`Session`] exists per telephony WebSocket. It owns all mutable
//! per-call state and is driven by a single task (the media handler's
//! select loop), so the two external event sources are serialized before
//! they reach it. Outputs go through channels: telephony frames to the
//! socket writer, client events to the agent socket task.
//!
//! The ordering rules it enforces:
//! - caller audio keeps arrival order toward the agent; agent audio keeps
//!   arrival order toward the caller
//! - nothing is sent to the caller before the stream id is known
//! - nothing is sent to the agent before the agent socket is open
//! - the init frame is sent exactly once, at the first moment both sides
//!   are ready, and before any buffered caller audio is drained

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::mpsc;

use super::prompts;
use crate::core::agent::messages::{
    AgentOverride, ConversationConfigOverride, ConversationInitiation, PromptOverride,
};
use crate::core::agent::{AgentCommand, AgentEvent, ClientEvent, ToolCallRequest};
use crate::core::twilio::{AmdClassification, StartMeta, StreamOutbound};
use crate::utils;

/// Cap on each direction's pre-ready audio buffer. Overflow drops the
/// oldest frame so the freshest audio survives.
pub const AUDIO_BUFFER_CAP: usize = 150;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle states of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Telephony socket accepted
    New,
    /// Agent connect in flight, no telephony start yet
    Connecting,
    /// Agent open, awaiting telephony start
    AgentReady,
    /// Telephony started, awaiting agent open
    TelcoStarted,
    /// Both sides open, init sent
    Ready,
    /// Close initiated on one side
    Closing,
    /// Irrecoverable setup error
    Failed,
    /// Both sides closed, call finalized
    Terminal,
}

/// Which way the call was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outbound,
    InboundReceptionist,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outbound => "outbound",
            CallDirection::InboundReceptionist => "inbound_receptionist",
        }
    }
}

/// Conversation flavor chosen from the AMD outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Normal,
    Voicemail,
}

// =============================================================================
// Session
// =============================================================================

/// All mutable state for one bridged call.
pub struct Session {
    state: SessionState,
    direction: CallDirection,
    mode: SessionMode,

    stream_sid: Option<String>,
    call_sid: Option<String>,
    custom_parameters: HashMap<String, String>,

    telco_tx: mpsc::Sender<StreamOutbound>,
    agent_tx: Option<mpsc::Sender<AgentCommand>>,

    /// Caller audio received before the agent socket opened
    inbound_buffer: VecDeque<String>,
    /// Agent audio received before the stream id was known
    outbound_buffer: VecDeque<String>,
    inbound_dropped: u64,
    outbound_dropped: u64,

    init_sent: bool,
    telco_started: bool,
    agent_open: bool,

    init_sent_at: Option<Instant>,
    first_agent_audio_at: Option<Instant>,
}

impl Session {
    /// A new session in state `New`, bound to the telephony writer.
    pub fn new(direction: CallDirection, telco_tx: mpsc::Sender<StreamOutbound>) -> Self {
        Self {
            state: SessionState::New,
            direction,
            mode: SessionMode::Normal,
            stream_sid: None,
            call_sid: None,
            custom_parameters: HashMap::new(),
            telco_tx,
            agent_tx: None,
            inbound_buffer: VecDeque::new(),
            outbound_buffer: VecDeque::new(),
            inbound_dropped: 0,
            outbound_dropped: 0,
            init_sent: false,
            telco_started: false,
            agent_open: false,
            init_sent_at: None,
            first_agent_audio_at: None,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn init_sent(&self) -> bool {
        self.init_sent
    }

    pub fn telco_started(&self) -> bool {
        self.telco_started
    }

    pub fn is_live(&self) -> bool {
        !matches!(
            self.state,
            SessionState::Closing | SessionState::Failed | SessionState::Terminal
        )
    }

    fn customer_name(&self) -> String {
        self.custom_parameters
            .get("name")
            .cloned()
            .unwrap_or_else(|| "there".to_string())
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// The agent factory was invoked for this session.
    pub fn begin_connecting(&mut self) {
        if self.state == SessionState::New {
            self.transition(SessionState::Connecting);
        }
    }

    /// The agent socket opened. Sends the init frame if the telephony side
    /// already started, then drains any buffered caller audio in order.
    pub async fn agent_opened(&mut self, agent_tx: mpsc::Sender<AgentCommand>) {
        self.agent_open = true;
        self.agent_tx = Some(agent_tx);

        if self.telco_started {
            self.transition(SessionState::Ready);
        } else {
            self.transition(SessionState::AgentReady);
        }

        self.maybe_send_init().await;
        self.drain_inbound_buffer().await;
    }

    /// The telephony `start` frame arrived. Records identity, applies the
    /// AMD classification if one was parked, sends the init frame if the
    /// agent is already open, then drains buffered agent audio.
    pub async fn handle_start(&mut self, meta: StartMeta, amd: Option<AmdClassification>) {
        if self.telco_started {
            tracing::warn!(
                call_sid = ?self.call_sid,
                "Duplicate start frame ignored"
            );
            return;
        }

        self.custom_parameters = meta.resolved_custom_parameters();
        self.stream_sid = Some(meta.stream_sid);
        self.call_sid = Some(meta.call_sid);
        self.telco_started = true;

        tracing::info!(
            stream_sid = ?self.stream_sid,
            call_sid = ?self.call_sid,
            direction = self.direction.as_str(),
            "Stream started"
        );

        if let Some(classification) = amd {
            self.apply_amd(classification);
        }

        if self.agent_open {
            self.transition(SessionState::Ready);
        } else {
            self.transition(SessionState::TelcoStarted);
        }

        self.maybe_send_init().await;
        self.drain_outbound_buffer().await;
    }

    /// Apply an AMD classification. First write wins; a machine outcome
    /// that lands after the init frame cannot rewrite the running
    /// conversation (the machine watchdog still finalizes the call).
    pub fn apply_amd(&mut self, classification: AmdClassification) {
        if !classification.is_machine() {
            return;
        }
        if self.init_sent {
            tracing::info!(
                call_sid = ?self.call_sid,
                classification = classification.as_str(),
                "Machine classification after init; leaving live flow to the watchdog"
            );
            return;
        }
        if self.mode != SessionMode::Voicemail {
            tracing::info!(
                call_sid = ?self.call_sid,
                classification = classification.as_str(),
                "Switching session to voicemail mode"
            );
            self.mode = SessionMode::Voicemail;
        }
    }

    /// Caller audio from the telephony socket.
    pub async fn handle_telco_media(&mut self, payload: String) {
        if self.agent_open
            && let Some(agent_tx) = &self.agent_tx
        {
            if agent_tx
                .send(AgentCommand::Send(ClientEvent::user_audio(payload)))
                .await
                .is_err()
            {
                // Agent task is gone; the events channel closing drives
                // the state change, this frame is simply dropped.
                tracing::warn!("Dropped caller audio: agent channel closed");
            }
            return;
        }

        push_bounded(
            &mut self.inbound_buffer,
            payload,
            &mut self.inbound_dropped,
        );
    }

    /// The telephony `stop` frame arrived.
    pub fn handle_stop(&mut self) {
        if matches!(self.state, SessionState::Terminal) {
            return;
        }
        tracing::info!(call_sid = ?self.call_sid, "Stream stopped by caller side");
        self.transition(SessionState::Closing);
    }

    /// The agent socket closed (events channel ended).
    pub fn agent_closed(&mut self) {
        self.agent_open = false;
        self.agent_tx = None;
        if self.is_live() {
            self.transition(SessionState::Closing);
        }
    }

    /// Irrecoverable setup failure.
    pub fn mark_failed(&mut self) {
        self.transition(SessionState::Failed);
    }

    /// Both sides closed and the call finalized.
    pub fn mark_terminal(&mut self) {
        self.transition(SessionState::Terminal);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(
                call_sid = ?self.call_sid,
                from = ?self.state,
                to = ?next,
                "Session transition"
            );
            self.state = next;
        }
    }

    // -------------------------------------------------------------------------
    // Agent events
    // -------------------------------------------------------------------------

    /// Route one event from the agent. Tool calls are handed back to the
    /// caller for dispatch; everything else is handled in place.
    pub async fn handle_agent_event(&mut self, event: AgentEvent) -> Option<ToolCallRequest> {
        if let Some(payload) = event.audio_payload() {
            self.handle_agent_audio(payload.to_string()).await;
            return None;
        }
        let ping_id = event.ping_event_id();

        match event {
            AgentEvent::Interruption { .. } => {
                let discarded = self.outbound_buffer.len();
                self.outbound_buffer.clear();
                if discarded > 0 {
                    tracing::debug!(discarded, "Interruption discarded buffered agent audio");
                }
                if let Some(stream_sid) = self.stream_sid.clone() {
                    self.send_to_telco(StreamOutbound::clear(stream_sid)).await;
                }
                None
            }

            AgentEvent::Ping { .. } => {
                if let Some(event_id) = ping_id
                    && let Some(agent_tx) = &self.agent_tx
                    && agent_tx
                        .send(AgentCommand::Send(ClientEvent::pong(event_id)))
                        .await
                        .is_err()
                {
                    tracing::warn!("Failed to answer agent ping: channel closed");
                }
                None
            }

            AgentEvent::ConversationInitiationMetadata { .. } => {
                tracing::debug!(call_sid = ?self.call_sid, "Agent session acknowledged");
                None
            }

            AgentEvent::AgentResponse {
                agent_response_event,
            } => {
                if let Some(ev) = agent_response_event {
                    tracing::info!(call_sid = ?self.call_sid, "Agent: {}", ev.agent_response);
                }
                None
            }

            AgentEvent::UserTranscript {
                user_transcript_event,
            } => {
                if let Some(ev) = user_transcript_event {
                    tracing::info!(call_sid = ?self.call_sid, "Caller: {}", ev.user_transcript);
                }
                None
            }

            AgentEvent::ClientToolCall { client_tool_call } => Some(client_tool_call),

            other => {
                tracing::warn!(?other, "Unhandled agent event dropped");
                None
            }
        }
    }

    async fn handle_agent_audio(&mut self, payload: String) {
        if self.first_agent_audio_at.is_none() {
            self.first_agent_audio_at = Some(Instant::now());
            if let Some(init_at) = self.init_sent_at {
                tracing::info!(
                    call_sid = ?self.call_sid,
                    latency_ms = init_at.elapsed().as_millis() as u64,
                    "First agent audio"
                );
            }
        }

        match self.stream_sid.clone() {
            Some(stream_sid) => {
                self.send_to_telco(StreamOutbound::media(stream_sid, payload))
                    .await;
            }
            None => {
                push_bounded(
                    &mut self.outbound_buffer,
                    payload,
                    &mut self.outbound_dropped,
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Init handshake
    // -------------------------------------------------------------------------

    /// Guarded init check, run on every transition that can complete
    /// readiness. Sends the frame at most once; a failed push leaves the
    /// flag unset so the next transition retries while both sides are
    /// still healthy.
    pub async fn maybe_send_init(&mut self) {
        if self.init_sent || !self.agent_open || !self.telco_started {
            return;
        }

        let init = self.build_init();
        let Some(agent_tx) = &self.agent_tx else {
            return;
        };

        match agent_tx
            .send(AgentCommand::Send(ClientEvent::Initiation(init)))
            .await
        {
            Ok(()) => {
                self.init_sent = true;
                self.init_sent_at = Some(Instant::now());
                tracing::info!(
                    call_sid = ?self.call_sid,
                    mode = ?self.mode,
                    "Init frame sent"
                );
            }
            Err(e) => {
                tracing::warn!("Init frame not sent, will retry on next transition: {e}");
            }
        }
    }

    fn build_init(&self) -> ConversationInitiation {
        let name = self.customer_name();

        let (first_message, prompt) = match self.mode {
            SessionMode::Normal => (prompts::live_first_message(&name), prompts::live_prompt()),
            SessionMode::Voicemail => (
                prompts::voicemail_first_message(&name),
                prompts::voicemail_prompt(),
            ),
        };

        let mut dynamic_variables = HashMap::from([
            ("CURRENT_DATE_YYYYMMDD".to_string(), utils::today()),
            ("TOMORROW_DATE_YYYYMMDD".to_string(), utils::tomorrow()),
            (
                "WEEK_FROM_TODAY_YYYYMMDD".to_string(),
                utils::week_from_today(),
            ),
            (
                "CALL_DIRECTION".to_string(),
                self.direction.as_str().to_string(),
            ),
            ("CUSTOMER_NAME".to_string(), name),
        ]);
        if let Some(number) = self.custom_parameters.get("number") {
            dynamic_variables.insert("CUSTOMER_NUMBER".to_string(), number.clone());
        }
        if let Some(record_id) = self.custom_parameters.get("airtableRecordId") {
            dynamic_variables.insert("AIRTABLE_RECORD_ID".to_string(), record_id.clone());
        }

        ConversationInitiation::new(
            ConversationConfigOverride {
                agent: AgentOverride {
                    first_message: Some(first_message),
                    prompt: Some(PromptOverride { prompt }),
                },
                ..Default::default()
            },
            dynamic_variables,
        )
    }

    // -------------------------------------------------------------------------
    // Buffers
    // -------------------------------------------------------------------------

    async fn drain_inbound_buffer(&mut self) {
        if self.inbound_buffer.is_empty() {
            return;
        }
        let Some(agent_tx) = self.agent_tx.clone() else {
            return;
        };

        let drained = self.inbound_buffer.len();
        while let Some(payload) = self.inbound_buffer.pop_front() {
            if agent_tx
                .send(AgentCommand::Send(ClientEvent::user_audio(payload)))
                .await
                .is_err()
            {
                tracing::warn!("Agent channel closed while draining caller audio");
                break;
            }
        }
        tracing::debug!(
            drained,
            dropped = self.inbound_dropped,
            "Drained buffered caller audio"
        );
    }

    async fn drain_outbound_buffer(&mut self) {
        if self.outbound_buffer.is_empty() {
            return;
        }
        let Some(stream_sid) = self.stream_sid.clone() else {
            return;
        };

        let drained = self.outbound_buffer.len();
        let payloads: Vec<String> = self.outbound_buffer.drain(..).collect();
        for payload in payloads {
            self.send_to_telco(StreamOutbound::media(stream_sid.clone(), payload))
                .await;
        }
        tracing::debug!(
            drained,
            dropped = self.outbound_dropped,
            "Drained buffered agent audio"
        );
    }

    async fn send_to_telco(&mut self, frame: StreamOutbound) {
        if self.telco_tx.send(frame).await.is_err() && self.is_live() {
            tracing::warn!(call_sid = ?self.call_sid, "Telephony writer gone");
            self.transition(SessionState::Closing);
        }
    }
}

/// Append with the drop-oldest overflow policy.
fn push_bounded(buffer: &mut VecDeque<String>, item: String, dropped: &mut u64) {
    if buffer.len() >= AUDIO_BUFFER_CAP {
        buffer.pop_front();
        *dropped += 1;
        if *dropped == 1 || dropped.is_multiple_of(50) {
            tracing::warn!(dropped, "Pre-ready audio buffer overflow, dropping oldest");
        }
    }
    buffer.push_back(item);
}
