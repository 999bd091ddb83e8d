//! Agent session factory.
//!
//! Opens one WebSocket to the agent provider (via a signed URL), spawns the
//! socket task, and hands the caller an [`AgentHandle`]: a command channel
//! into the socket and a typed event stream out of it. The events channel
//! closing is the signal that the agent side is gone.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::config::{AGENT_CHANNEL_CAPACITY, AGENT_CONNECT_TIMEOUT};
use super::messages::{AgentEvent, ClientEvent};
use crate::errors::{BridgeError, BridgeResult};

/// Commands accepted by the socket task.
#[derive(Debug)]
pub enum AgentCommand {
    /// Serialize and send one client event
    Send(ClientEvent),
    /// Close the socket cleanly
    Close,
}

/// Session-owned handle to a connected agent socket.
#[derive(Debug)]
pub struct AgentHandle {
    /// Commands into the socket
    pub commands: mpsc::Sender<AgentCommand>,
    /// Typed events out of the socket. `None` means the agent closed.
    pub events: mpsc::Receiver<AgentEvent>,
}

/// Open an agent WebSocket with a bounded connect handshake.
///
/// Fails with [`BridgeError::AgentUnavailable`] on timeout or connect
/// failure.
pub async fn connect(signed_url: &str) -> BridgeResult<AgentHandle> {
    let (ws_stream, _response) = timeout(AGENT_CONNECT_TIMEOUT, connect_async(signed_url))
        .await
        .map_err(|_| BridgeError::AgentUnavailable("connect timed out".to_string()))?
        .map_err(|e| BridgeError::AgentUnavailable(e.to_string()))?;

    tracing::info!("Connected to agent");

    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (command_tx, mut command_rx) = mpsc::channel::<AgentCommand>(AGENT_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(AGENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(AgentCommand::Send(event)) => {
                            let json = match serde_json::to_string(&event) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize agent event: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                                tracing::warn!("Agent send failed: {e}");
                                break;
                            }
                        }
                        Some(AgentCommand::Close) | None => {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }

                message = ws_source.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<AgentEvent>(&text) {
                                Ok(event) => {
                                    if event_tx.send(event).await.is_err() {
                                        // Bridge went away; nothing left to do.
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Unparseable agent frame dropped: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                tracing::warn!("Agent pong failed: {e}");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Agent closed the socket");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("Agent socket error: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        // Dropping event_tx closes the events channel, which is how the
        // bridge observes agent closure.
        tracing::debug!("Agent socket task ended");
    });

    Ok(AgentHandle {
        commands: command_tx,
        events: event_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_maps_to_agent_unavailable() {
        // Nothing listens here; connect fails (or times out) quickly.
        let err = connect("ws://127.0.0.1:1/convai").await.unwrap_err();
        assert!(matches!(err, BridgeError::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let err = connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, BridgeError::AgentUnavailable(_)));
    }
}
