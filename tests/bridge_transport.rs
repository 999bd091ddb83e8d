//! Transport-level bridge tests.
//!
//! These drive `run_bridge` over channel-backed sockets instead of a live
//! WebSocket, covering the setup-failure paths the session-level tests
//! cannot reach: signed-URL acquisition failure, the agent-open timeout
//! after a started stream, the 1011 close toward the caller side, and the
//! exactly-once finalize claim.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, close_code};
use futures::StreamExt;
use futures::channel::mpsc as futures_mpsc;
use serde_json::json;

use voicebridge::config::ServerConfig;
use voicebridge::core::tools::ToolDispatcher;
use voicebridge::core::twilio::TwilioClient;
use voicebridge::core::{CallDirection, SignedUrlCache};
use voicebridge::handlers::media::run_bridge;
use voicebridge::state::AppState;

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_host: "http://localhost:8000".to_string(),
        elevenlabs_api_key: "el-key".to_string(),
        elevenlabs_agent_id: "agent-1".to_string(),
        twilio_account_sid: "AC0".to_string(),
        twilio_auth_token: "token".to_string(),
        twilio_phone_number: "+15550000000".to_string(),
        cal_com_api_key: None,
        environment: "test".to_string(),
    }
}

/// State wired to local endpoints: the signed-URL mint goes wherever the
/// test says, the Twilio API goes to an unroutable port so finalization
/// fails fast instead of reaching the network.
fn test_state(signed_url_endpoint: &str) -> Arc<AppState> {
    let signed_urls =
        Arc::new(SignedUrlCache::new("el-key", "agent-1").with_endpoint(signed_url_endpoint));
    let twilio = Arc::new(
        TwilioClient::new("AC0", "token", "+15550000000").with_base_url("http://127.0.0.1:1"),
    );
    let tools = Arc::new(ToolDispatcher::new(None));
    AppState::assemble_with(test_config(), signed_urls, twilio, tools)
}

fn start_frame(stream_sid: &str, call_sid: &str) -> Message {
    let frame = json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": stream_sid,
        "start": {
            "streamSid": stream_sid,
            "callSid": call_sid,
            "tracks": ["inbound"],
            "customParameters": { "name": "John" }
        }
    });
    Message::Text(frame.to_string().into())
}

fn assert_error_close(frame: Message) {
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, close_code::ERROR);
            assert_eq!(close.reason.as_str(), "agent unavailable");
        }
        other => panic!("Expected 1011 close, got {other:?}"),
    }
}

/// Scenario: agent unavailable. Signed-URL acquisition fails before the
/// stream starts; the failure is held until the start frame lands, then
/// the caller socket is closed with 1011. No frame other than the close
/// ever reaches the caller side (so no init preceded the failure), and
/// the bridge claims the finalize-once guard for the call.
#[tokio::test]
async fn agent_unavailable_defers_1011_close_until_start() {
    let state = test_state("http://127.0.0.1:1/signed");

    let (in_tx, in_rx) = futures_mpsc::unbounded::<Result<Message, axum::Error>>();
    let (out_tx, mut out_rx) = futures_mpsc::unbounded::<Message>();

    let bridge_state = state.clone();
    let bridge = tokio::spawn(async move {
        run_bridge(out_tx, in_rx, &bridge_state, CallDirection::Outbound).await;
    });

    // Let the signed-URL acquisition fail before the caller side starts.
    tokio::time::sleep(Duration::from_millis(300)).await;
    in_tx
        .unbounded_send(Ok(start_frame("MZ61", "CA61")))
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(10), out_rx.next())
        .await
        .expect("bridge should close the caller socket")
        .expect("close frame expected");
    assert_error_close(frame);

    // The socket saw exactly one close and nothing else.
    assert!(out_rx.next().await.is_none());

    bridge.await.unwrap();

    // Finalization was claimed by the bridge, exactly once.
    assert!(!state.amd.begin_finalize("CA61").await);
}

/// Scenario: the stream starts but the agent never opens. The signed-URL
/// endpoint accepts the connection and never answers, so the connect
/// attempt hangs; the open timeout fires after the start frame and the
/// caller socket is closed with 1011. The paused clock fast-forwards the
/// timeout.
#[tokio::test(start_paused = true)]
async fn agent_open_timeout_closes_started_session_with_1011() {
    // Accepts and holds connections without ever responding.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://127.0.0.1:{}/signed", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let state = test_state(&endpoint);

    let (in_tx, in_rx) = futures_mpsc::unbounded::<Result<Message, axum::Error>>();
    let (out_tx, mut out_rx) = futures_mpsc::unbounded::<Message>();

    // Queue the start frame before the bridge's first poll so the open
    // timeout runs against a started session.
    in_tx
        .unbounded_send(Ok(start_frame("MZ62", "CA62")))
        .unwrap();

    let bridge_state = state.clone();
    let bridge = tokio::spawn(async move {
        run_bridge(out_tx, in_rx, &bridge_state, CallDirection::Outbound).await;
    });

    let frame = tokio::time::timeout(Duration::from_secs(30), out_rx.next())
        .await
        .expect("open timeout should close the caller socket")
        .expect("close frame expected");
    assert_error_close(frame);
    assert!(out_rx.next().await.is_none());

    bridge.await.unwrap();
    assert!(!state.amd.begin_finalize("CA62").await);
}

/// A clean caller-side close tears the bridge down without the error
/// close code: the caller socket is closed exactly once, normally. The
/// agent connection is still pending (hanging endpoint) when the stop
/// arrives, so the stop drives the close, not a connect failure.
#[tokio::test]
async fn caller_stop_closes_normally() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://127.0.0.1:{}/signed", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let state = test_state(&endpoint);

    let (in_tx, in_rx) = futures_mpsc::unbounded::<Result<Message, axum::Error>>();
    let (out_tx, mut out_rx) = futures_mpsc::unbounded::<Message>();

    let bridge_state = state.clone();
    let bridge = tokio::spawn(async move {
        run_bridge(out_tx, in_rx, &bridge_state, CallDirection::Outbound).await;
    });

    in_tx
        .unbounded_send(Ok(start_frame("MZ63", "CA63")))
        .unwrap();
    let stop = json!({ "event": "stop", "streamSid": "MZ63", "stop": { "callSid": "CA63" } });
    in_tx
        .unbounded_send(Ok(Message::Text(stop.to_string().into())))
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(10), out_rx.next())
        .await
        .expect("bridge should close the caller socket")
        .expect("close frame expected");
    match frame {
        Message::Close(close) => assert!(close.is_none(), "stop must not close with an error"),
        other => panic!("Expected close frame, got {other:?}"),
    }
    assert!(out_rx.next().await.is_none());

    bridge.await.unwrap();
    assert!(!state.amd.begin_finalize("CA63").await);
}
