//! Conversational-agent WebSocket message types.
//!
//! All frames are JSON over the signed-URL WebSocket.
//!
//! # Protocol Overview
//!
//! Client events (sent to the agent):
//! - conversation_initiation_client_data - one-shot session parameterization
//! - user_audio_chunk - one base64 audio chunk (untagged frame)
//! - pong - reply to a server ping
//! - client_tool_result - result envelope for a tool call
//!
//! Server events (received from the agent):
//! - conversation_initiation_metadata - session acknowledged
//! - audio / audio_event - base64 agent speech
//! - interruption - caller barged in; clear pending playback
//! - ping - liveness probe carrying an event id
//! - agent_response / user_transcript - observability only
//! - client_tool_call - tool invocation request

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::config::{AUDIO_ENCODING, AUDIO_SAMPLE_RATE};

// =============================================================================
// Server Events (Agent -> Server)
// =============================================================================

/// Events received from the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Session acknowledged; metadata is logged, not routed.
    #[serde(rename = "conversation_initiation_metadata")]
    ConversationInitiationMetadata {
        /// Raw metadata block
        #[serde(default)]
        conversation_initiation_metadata_event: Option<serde_json::Value>,
    },

    /// Agent speech. The payload block has appeared under two names across
    /// protocol revisions; both are accepted.
    #[serde(rename = "audio")]
    Audio {
        #[serde(default)]
        audio: Option<AudioChunk>,
        #[serde(default)]
        audio_event: Option<AudioEventPayload>,
    },

    /// Agent speech, event-block form.
    #[serde(rename = "audio_event")]
    AudioEvent { audio_event: AudioEventPayload },

    /// The caller interrupted the agent mid-utterance.
    #[serde(rename = "interruption")]
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },

    /// Liveness probe. Must be answered with a pong carrying the event id.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        ping_event: Option<PingEvent>,
        /// Flat form used by older protocol revisions
        #[serde(default)]
        event_id: Option<u64>,
    },

    /// Finalized agent utterance text.
    #[serde(rename = "agent_response")]
    AgentResponse {
        #[serde(default)]
        agent_response_event: Option<AgentResponseEvent>,
    },

    /// Finalized caller utterance text.
    #[serde(rename = "user_transcript")]
    UserTranscript {
        #[serde(default)]
        user_transcript_event: Option<UserTranscriptEvent>,
    },

    /// Tool invocation request.
    #[serde(rename = "client_tool_call")]
    ClientToolCall { client_tool_call: ToolCallRequest },

    /// Anything we do not route.
    #[serde(other)]
    Other,
}

impl AgentEvent {
    /// Base64 audio payload, whichever field shape carried it.
    pub fn audio_payload(&self) -> Option<&str> {
        match self {
            AgentEvent::Audio { audio, audio_event } => audio
                .as_ref()
                .map(|a| a.chunk.as_str())
                .or_else(|| audio_event.as_ref().map(|a| a.audio_base_64.as_str())),
            AgentEvent::AudioEvent { audio_event } => Some(audio_event.audio_base_64.as_str()),
            _ => None,
        }
    }

    /// Event id of a ping, whichever field shape carried it.
    pub fn ping_event_id(&self) -> Option<u64> {
        match self {
            AgentEvent::Ping {
                ping_event,
                event_id,
            } => ping_event.as_ref().map(|p| p.event_id).or(*event_id),
            _ => None,
        }
    }
}

/// Audio payload, chunk form.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioChunk {
    pub chunk: String,
}

/// Audio payload, event-block form.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioEventPayload {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: Option<u64>,
}

/// Interruption metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptionEvent {
    #[serde(default)]
    pub event_id: Option<u64>,
}

/// Ping metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: u64,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

/// Agent utterance text.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    #[serde(default)]
    pub agent_response: String,
}

/// Caller utterance text.
#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptEvent {
    #[serde(default)]
    pub user_transcript: String,
}

/// Tool invocation request from the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

// =============================================================================
// Client Events (Server -> Agent)
// =============================================================================

/// Events sent to the agent. Untagged because the audio frame carries no
/// `type` discriminator on this wire.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientEvent {
    /// One-shot session parameterization
    Initiation(ConversationInitiation),
    /// One base64 audio chunk from the caller
    UserAudio { user_audio_chunk: String },
    /// Reply to a server ping
    Pong(Pong),
    /// Tool result envelope
    ToolResult(ClientToolResult),
}

impl ClientEvent {
    pub fn user_audio(chunk: impl Into<String>) -> Self {
        ClientEvent::UserAudio {
            user_audio_chunk: chunk.into(),
        }
    }

    pub fn pong(event_id: u64) -> Self {
        ClientEvent::Pong(Pong {
            message_type: "pong",
            event_id,
        })
    }

    pub fn tool_result(tool_call_id: impl Into<String>, result: String, is_error: bool) -> Self {
        ClientEvent::ToolResult(ClientToolResult {
            message_type: "client_tool_result",
            tool_call_id: tool_call_id.into(),
            result,
            is_error,
        })
    }
}

/// Pong frame.
#[derive(Debug, Clone, Serialize)]
pub struct Pong {
    #[serde(rename = "type")]
    message_type: &'static str,
    pub event_id: u64,
}

/// Tool result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ClientToolResult {
    #[serde(rename = "type")]
    message_type: &'static str,
    pub tool_call_id: String,
    /// JSON-encoded result string
    pub result: String,
    pub is_error: bool,
}

/// The init frame: configuration overrides plus dynamic variables the
/// agent's prompt templates interpolate.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInitiation {
    #[serde(rename = "type")]
    message_type: &'static str,
    pub conversation_config_override: ConversationConfigOverride,
    pub dynamic_variables: HashMap<String, String>,
}

impl ConversationInitiation {
    pub fn new(
        config_override: ConversationConfigOverride,
        dynamic_variables: HashMap<String, String>,
    ) -> Self {
        Self {
            message_type: "conversation_initiation_client_data",
            conversation_config_override: config_override,
            dynamic_variables,
        }
    }
}

/// Per-session configuration overrides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationConfigOverride {
    pub agent: AgentOverride,
    pub tts: TtsOverride,
    pub audio_output: AudioOutput,
}

/// Agent behavior overrides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentOverride {
    /// Opening line spoken before the caller says anything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    /// System-prompt override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
}

/// System-prompt override block.
#[derive(Debug, Clone, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

/// TTS overrides. Empty by default; present so the override block always
/// has the full shape the provider documents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TtsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Output audio hints for the telephony leg.
#[derive(Debug, Clone, Serialize)]
pub struct AudioOutput {
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self {
            encoding: AUDIO_ENCODING.to_string(),
            sample_rate: AUDIO_SAMPLE_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_chunk_form_deserialization() {
        let json = r#"{"type":"audio","audio":{"chunk":"ZZZ="}}"#;
        let event: AgentEvent = serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(event.audio_payload(), Some("ZZZ="));
    }

    #[test]
    fn test_audio_event_form_deserialization() {
        let json = r#"{"type":"audio","audio_event":{"audio_base_64":"QQ==","event_id":7}}"#;
        let event: AgentEvent = serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(event.audio_payload(), Some("QQ=="));

        let json = r#"{"type":"audio_event","audio_event":{"audio_base_64":"QQ=="}}"#;
        let event: AgentEvent = serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(event.audio_payload(), Some("QQ=="));
    }

    #[test]
    fn test_ping_both_shapes() {
        let nested: AgentEvent =
            serde_json::from_str(r#"{"type":"ping","ping_event":{"event_id":42,"ping_ms":10}}"#)
                .unwrap();
        assert_eq!(nested.ping_event_id(), Some(42));

        let flat: AgentEvent = serde_json::from_str(r#"{"type":"ping","event_id":7}"#).unwrap();
        assert_eq!(flat.ping_event_id(), Some(7));
    }

    #[test]
    fn test_interruption_deserialization() {
        let event: AgentEvent = serde_json::from_str(r#"{"type":"interruption"}"#).unwrap();
        assert!(matches!(event, AgentEvent::Interruption { .. }));
    }

    #[test]
    fn test_client_tool_call_deserialization() {
        let json = r#"{
            "type": "client_tool_call",
            "client_tool_call": {
                "tool_name": "get_available_slots",
                "tool_call_id": "t1",
                "parameters": {
                    "eventTypeId": "2171540",
                    "start": "2025-02-01",
                    "end": "2025-02-07",
                    "timeZone": "Australia/Perth"
                }
            }
        }"#;

        let event: AgentEvent = serde_json::from_str(json).expect("Should deserialize");
        match event {
            AgentEvent::ClientToolCall { client_tool_call } => {
                assert_eq!(client_tool_call.tool_name, "get_available_slots");
                assert_eq!(client_tool_call.tool_call_id, "t1");
                assert_eq!(client_tool_call.parameters["timeZone"], "Australia/Perth");
            }
            _ => panic!("Expected ClientToolCall variant"),
        }
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let event: AgentEvent =
            serde_json::from_str(r#"{"type":"internal_tentative_agent_response","x":1}"#).unwrap();
        assert!(matches!(event, AgentEvent::Other));
    }

    #[test]
    fn test_user_audio_serialization_is_untagged() {
        let json = serde_json::to_string(&ClientEvent::user_audio("AAA=")).unwrap();
        assert_eq!(json, r#"{"user_audio_chunk":"AAA="}"#);
    }

    #[test]
    fn test_pong_serialization() {
        let json = serde_json::to_string(&ClientEvent::pong(42)).unwrap();
        assert!(json.contains(r#""type":"pong""#));
        assert!(json.contains(r#""event_id":42"#));
    }

    #[test]
    fn test_tool_result_serialization() {
        let json = serde_json::to_string(&ClientEvent::tool_result(
            "t1",
            r#"{"slots":[]}"#.to_string(),
            false,
        ))
        .unwrap();
        assert!(json.contains(r#""type":"client_tool_result""#));
        assert!(json.contains(r#""tool_call_id":"t1""#));
        assert!(json.contains(r#""is_error":false"#));
    }

    #[test]
    fn test_initiation_serialization_shape() {
        let init = ConversationInitiation::new(
            ConversationConfigOverride {
                agent: AgentOverride {
                    first_message: Some("Hello John".to_string()),
                    prompt: Some(PromptOverride {
                        prompt: "You are a receptionist.".to_string(),
                    }),
                },
                ..Default::default()
            },
            HashMap::from([
                ("CUSTOMER_NAME".to_string(), "John".to_string()),
                ("CALL_DIRECTION".to_string(), "outbound".to_string()),
            ]),
        );

        let json = serde_json::to_string(&ClientEvent::Initiation(init)).unwrap();
        assert!(json.contains(r#""type":"conversation_initiation_client_data""#));
        assert!(json.contains(r#""encoding":"ulaw""#));
        assert!(json.contains(r#""sample_rate":8000"#));
        assert!(json.contains(r#""CUSTOMER_NAME":"John""#));
        assert!(json.contains(r#""first_message":"Hello John""#));
    }
}
