//! Media-stream WebSocket handlers.
//!
//! Twilio connects here with the call's audio. Each connection gets one
//! [`Session`] driven by a single select loop over: the telephony socket,
//! the agent connect result, the agent event stream, the late-AMD
//! subscription, outgoing telephony frames, and the session's deadlines.
//! Serializing everything through one loop is what makes the init
//! handshake race-free.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::State;
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::agent::{self, AGENT_OPEN_TIMEOUT, AgentCommand, AgentEvent, AgentHandle, ClientEvent};
use crate::core::bridge::{HANGUP_GRACE, VOICEMAIL_WATCHDOG};
use crate::core::tools::is_hangup_tool;
use crate::core::twilio::{AmdClassification, StreamInbound, StreamOutbound};
use crate::core::{CallDirection, Session, SessionMode, SessionState};
use crate::errors::BridgeResult;
use crate::state::AppState;

/// Channel capacity for outgoing telephony frames.
const TELCO_CHANNEL_CAPACITY: usize = 1024;

/// How long a fresh connection may sit without a `start` frame.
const TELCO_START_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket endpoint for outbound calls.
pub async fn outbound_media_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_media_socket(socket, state, CallDirection::Outbound))
}

/// WebSocket endpoint for inbound calls.
pub async fn inbound_media_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_media_socket(socket, state, CallDirection::InboundReceptionist)
    })
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, direction: CallDirection) {
    info!(direction = direction.as_str(), "Media stream connected");
    state.session_started();
    let (ws_sink, ws_source) = socket.split();
    run_bridge(ws_sink, ws_source, &state, direction).await;
    state.session_ended();
    info!(direction = direction.as_str(), "Media stream terminated");
}

/// Poll an optional oneshot without consuming it on cancellation. The
/// caller must clear the slot once this yields.
async fn recv_oneshot<T>(slot: &mut Option<oneshot::Receiver<T>>) -> Option<T> {
    match slot.as_mut() {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

/// Receive from an optional mpsc receiver; pending while absent.
async fn recv_events(slot: &mut Option<mpsc::Receiver<AgentEvent>>) -> Option<AgentEvent> {
    match slot.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleep until an optional deadline; pending while unset.
async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Drive one call over an already-split telephony socket.
///
/// Generic over the sink and stream so tests can substitute
/// channel-backed transports for the live WebSocket and observe the
/// close handshake directly.
pub async fn run_bridge<Snk, Src>(
    mut ws_sink: Snk,
    mut ws_source: Src,
    state: &Arc<AppState>,
    direction: CallDirection,
) where
    Snk: Sink<Message> + Unpin,
    Src: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (telco_tx, mut telco_rx) = mpsc::channel::<StreamOutbound>(TELCO_CHANNEL_CAPACITY);
    let mut session = Session::new(direction, telco_tx);

    // Kick off the agent connection immediately; a prewarmed signed URL
    // makes this usually complete before the start frame arrives.
    session.begin_connecting();
    let (connect_tx, connect_rx) = oneshot::channel::<BridgeResult<AgentHandle>>();
    {
        let cache = state.signed_urls.clone();
        tokio::spawn(async move {
            let result = async {
                let url = cache.get_url().await?;
                agent::connect(&url).await
            }
            .await;
            let _ = connect_tx.send(result);
        });
    }

    let mut connect_slot = Some(connect_rx);
    let mut agent_events: Option<mpsc::Receiver<AgentEvent>> = None;
    let mut agent_tx: Option<mpsc::Sender<AgentCommand>> = None;
    let mut amd_slot: Option<oneshot::Receiver<AmdClassification>> = None;

    let mut start_deadline = Some(Instant::now() + TELCO_START_TIMEOUT);
    let mut agent_open_deadline: Option<Instant> = None;
    let mut voicemail_deadline: Option<Instant> = None;
    let mut hangup_deadline: Option<Instant> = None;
    let mut close_with_error = false;
    // Set when the agent connection fails before identity is known; the
    // session then fails on the start frame so the call can be finalized.
    let mut agent_failed = false;

    loop {
        tokio::select! {
            // Frames from Twilio.
            message = ws_source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<StreamInbound>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Unparseable telephony frame dropped: {e}");
                                continue;
                            }
                        };
                        match frame {
                            StreamInbound::Connected { protocol, .. } => {
                                debug!(?protocol, "Telephony handshake frame");
                            }
                            StreamInbound::Start { start, .. } => {
                                start_deadline = None;
                                let amd = state.amd.take(&start.call_sid).await;
                                let call_sid = start.call_sid.clone();
                                session.handle_start(start, amd).await;
                                if agent_failed {
                                    session.mark_failed();
                                    close_with_error = true;
                                    break;
                                }
                                if amd.is_none() {
                                    amd_slot = Some(state.amd.subscribe(&call_sid).await);
                                }
                                if session.state() == SessionState::TelcoStarted {
                                    agent_open_deadline =
                                        Some(Instant::now() + AGENT_OPEN_TIMEOUT);
                                }
                                arm_voicemail_watchdog(&session, &mut voicemail_deadline);
                            }
                            StreamInbound::Media { media } => {
                                session.handle_telco_media(media.payload).await;
                            }
                            StreamInbound::Stop { .. } => {
                                session.handle_stop();
                                break;
                            }
                            StreamInbound::Other => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        session.handle_stop();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Telephony socket error: {e}");
                        session.handle_stop();
                        break;
                    }
                }
            }

            // Frames from the session toward Twilio.
            Some(frame) = telco_rx.recv() => {
                let json = match serde_json::to_string(&frame) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize telephony frame: {e}");
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(json.into())).await.is_err() {
                    session.handle_stop();
                    break;
                }
            }

            // Agent connection outcome.
            result = recv_oneshot(&mut connect_slot) => {
                connect_slot = None;
                match result {
                    Some(Ok(handle)) => {
                        agent_open_deadline = None;
                        agent_tx = Some(handle.commands.clone());
                        agent_events = Some(handle.events);
                        session.agent_opened(handle.commands).await;
                        arm_voicemail_watchdog(&session, &mut voicemail_deadline);
                    }
                    Some(Err(e)) => {
                        warn!("Agent connection failed: {e}");
                        if session.telco_started() {
                            session.mark_failed();
                            close_with_error = true;
                            break;
                        }
                        agent_failed = true;
                    }
                    None => {
                        if session.telco_started() {
                            session.mark_failed();
                            close_with_error = true;
                            break;
                        }
                        agent_failed = true;
                    }
                }
            }

            // Events from the agent.
            event = recv_events(&mut agent_events) => {
                match event {
                    Some(event) => {
                        if let Some(tool_call) = session.handle_agent_event(event).await {
                            dispatch_tool_call(
                                state,
                                &agent_tx,
                                tool_call,
                                &mut hangup_deadline,
                            )
                            .await;
                        }
                    }
                    None => {
                        agent_events = None;
                        session.agent_closed();
                        break;
                    }
                }
            }

            // AMD classification landing after start.
            classification = recv_oneshot(&mut amd_slot) => {
                amd_slot = None;
                if let Some(classification) = classification {
                    session.apply_amd(classification);
                    arm_voicemail_watchdog(&session, &mut voicemail_deadline);
                }
            }

            // No start frame in time.
            _ = sleep_opt(start_deadline) => {
                warn!("No start frame received, failing session");
                session.mark_failed();
                break;
            }

            // Started but the agent never opened.
            _ = sleep_opt(agent_open_deadline) => {
                warn!(call_sid = ?session.call_sid(), "Agent did not open in time");
                session.mark_failed();
                close_with_error = true;
                break;
            }

            // Voicemail delivery overran its budget.
            _ = sleep_opt(voicemail_deadline) => {
                warn!(call_sid = ?session.call_sid(), "Voicemail watchdog fired, closing");
                session.handle_stop();
                break;
            }

            // Hangup tool acknowledged; grace period elapsed.
            _ = sleep_opt(hangup_deadline) => {
                info!(call_sid = ?session.call_sid(), "Hangup requested by agent tool");
                session.handle_stop();
                break;
            }
        }
    }

    // Teardown: close the agent side at its current position.
    if let Some(agent_tx) = agent_tx.take() {
        let _ = agent_tx.send(AgentCommand::Close).await;
    }

    // Close the telephony side exactly once, with 1011 on setup failure.
    let close_frame = close_with_error.then(|| CloseFrame {
        code: close_code::ERROR,
        reason: "agent unavailable".into(),
    });
    let _ = ws_sink.send(Message::Close(close_frame)).await;

    // Finalize the call; the registry guard keeps this at most once even
    // when the AMD watchdog or /end-call raced us.
    if let Some(call_sid) = session.call_sid().map(str::to_string)
        && let Err(e) = state.finalize_call(&call_sid).await
    {
        warn!(call_sid, "Call finalization failed: {e}");
    }

    session.mark_terminal();
}

/// Arm the voicemail watchdog once the voicemail init frame is out.
fn arm_voicemail_watchdog(session: &Session, deadline: &mut Option<Instant>) {
    if session.mode() == SessionMode::Voicemail && session.init_sent() && deadline.is_none() {
        *deadline = Some(Instant::now() + VOICEMAIL_WATCHDOG);
        debug!(call_sid = ?session.call_sid(), "Voicemail watchdog armed");
    }
}

/// Execute a tool call. Hangup tools are acknowledged inline and schedule
/// the close; everything else dispatches off the loop so slow backends
/// never stall audio.
async fn dispatch_tool_call(
    state: &Arc<AppState>,
    agent_tx: &Option<mpsc::Sender<AgentCommand>>,
    tool_call: crate::core::agent::ToolCallRequest,
    hangup_deadline: &mut Option<Instant>,
) {
    let Some(agent_tx) = agent_tx.clone() else {
        warn!(tool = %tool_call.tool_name, "Tool call with no agent channel");
        return;
    };

    if is_hangup_tool(&tool_call.tool_name) {
        let outcome = state.tools.dispatch(&tool_call).await;
        let _ = agent_tx
            .send(AgentCommand::Send(ClientEvent::tool_result(
                tool_call.tool_call_id,
                outcome.result,
                outcome.is_error,
            )))
            .await;
        *hangup_deadline = Some(Instant::now() + HANGUP_GRACE);
        return;
    }

    let tools = state.tools.clone();
    tokio::spawn(async move {
        let outcome = tools.dispatch(&tool_call).await;
        if agent_tx
            .send(AgentCommand::Send(ClientEvent::tool_result(
                tool_call.tool_call_id,
                outcome.result,
                outcome.is_error,
            )))
            .await
            .is_err()
        {
            warn!("Tool result dropped: agent channel closed");
        }
    });
}
