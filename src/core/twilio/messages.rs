//! Twilio Media Streams WebSocket message types.
//!
//! Twilio connects to our media-stream endpoints and exchanges JSON frames
//! over the socket. Field names on this wire are camelCase.
//!
//! # Protocol Overview
//!
//! Inbound events (Twilio -> server):
//! - connected - socket established, protocol metadata
//! - start - stream metadata: streamSid, callSid, customParameters
//! - media - one base64 mu-law audio chunk
//! - stop - stream ended
//!
//! Outbound events (server -> Twilio):
//! - media - base64 audio to play to the caller
//! - clear - discard any audio Twilio has buffered but not yet played

use std::collections::HashMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound Frames (Twilio -> Server)
// =============================================================================

/// Inbound media-stream frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum StreamInbound {
    /// Socket-level handshake frame, sent before `start`.
    #[serde(rename = "connected")]
    Connected {
        /// Protocol name (always "Call")
        #[serde(default)]
        protocol: Option<String>,
        /// Protocol version
        #[serde(default)]
        version: Option<String>,
    },

    /// Stream metadata. Arrives exactly once, before any `media`.
    #[serde(rename = "start")]
    Start {
        /// Stream identifier, duplicated from the nested block
        #[serde(rename = "streamSid")]
        #[serde(default)]
        stream_sid: Option<String>,
        /// Nested start metadata
        start: StartMeta,
    },

    /// One audio chunk from the caller.
    #[serde(rename = "media")]
    Media {
        /// Audio payload block
        media: MediaPayload,
    },

    /// Stream ended; the call is over or was redirected.
    #[serde(rename = "stop")]
    Stop {
        /// Nested stop metadata
        #[serde(default)]
        stop: Option<StopMeta>,
    },

    /// Any frame type we do not route (`mark`, `dtmf`, ...).
    #[serde(other)]
    Other,
}

/// Metadata carried by the `start` frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    /// Stream identifier
    pub stream_sid: String,
    /// Call identifier
    pub call_sid: String,
    /// Account identifier
    #[serde(default)]
    pub account_sid: Option<String>,
    /// Media tracks in the stream ("inbound", "outbound")
    #[serde(default)]
    pub tracks: Vec<String>,
    /// TwiML `<Parameter>` values
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMeta {
    /// Custom parameters with the packed encodings unwrapped.
    ///
    /// The canonical form is one plain `<Parameter>` per value. Two packed
    /// forms are also accepted and merged: a `customParams` entry holding
    /// JSON (what our own answer URL forwards), and the historic
    /// `customParameters` entry holding base64-encoded JSON. Plain keys
    /// win on conflict.
    pub fn resolved_custom_parameters(&self) -> HashMap<String, String> {
        let mut resolved = HashMap::new();

        if let Some(blob) = self.custom_parameters.get("customParameters")
            && let Ok(decoded) = BASE64_STANDARD.decode(blob)
        {
            merge_json_object(&mut resolved, &decoded);
        }
        if let Some(json) = self.custom_parameters.get("customParams") {
            merge_json_object(&mut resolved, json.as_bytes());
        }

        for (key, val) in &self.custom_parameters {
            if key != "customParameters" && key != "customParams" {
                resolved.insert(key.clone(), val.clone());
            }
        }

        resolved
    }
}

/// Merge the string fields of a JSON object into `target`.
fn merge_json_object(target: &mut HashMap<String, String>, raw: &[u8]) {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw)
        && let Some(object) = value.as_object()
    {
        for (key, val) in object {
            if let Some(s) = val.as_str() {
                target.insert(key.clone(), s.to_string());
            } else {
                target.insert(key.clone(), val.to_string());
            }
        }
    }
}

/// Audio block of a `media` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded mu-law audio
    pub payload: String,
    /// Track the audio belongs to
    #[serde(default)]
    pub track: Option<String>,
    /// Monotonic chunk counter (stringly typed on the wire)
    #[serde(default)]
    pub chunk: Option<String>,
    /// Milliseconds since stream start (stringly typed on the wire)
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Metadata carried by the `stop` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    /// Call identifier
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Account identifier
    #[serde(default)]
    pub account_sid: Option<String>,
}

// =============================================================================
// Outbound Frames (Server -> Twilio)
// =============================================================================

/// Outbound media-stream frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum StreamOutbound {
    /// Audio for Twilio to play to the caller.
    #[serde(rename = "media")]
    Media {
        /// Stream this audio belongs to
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio payload block
        media: OutboundMedia,
    },

    /// Drop any audio Twilio has buffered but not yet played.
    #[serde(rename = "clear")]
    Clear {
        /// Stream to clear
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Audio block of an outbound `media` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded mu-law audio
    pub payload: String,
}

impl StreamOutbound {
    /// Build a `media` frame.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        StreamOutbound::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    /// Build a `clear` frame.
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        StreamOutbound::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_frame_deserialization() {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": {
                    "name": "John",
                    "number": "+15551234",
                    "airtableRecordId": "rec_X"
                }
            }
        }"#;

        let frame: StreamInbound = serde_json::from_str(json).expect("Should deserialize");
        match frame {
            StreamInbound::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ1"));
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.custom_parameters.get("name").unwrap(), "John");
            }
            _ => panic!("Expected Start variant"),
        }
    }

    #[test]
    fn test_media_frame_deserialization() {
        let json = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"160","payload":"AAA="}}"#;
        let frame: StreamInbound = serde_json::from_str(json).expect("Should deserialize");
        match frame {
            StreamInbound::Media { media } => assert_eq!(media.payload, "AAA="),
            _ => panic!("Expected Media variant"),
        }
    }

    #[test]
    fn test_stop_and_connected_frames() {
        let stop: StreamInbound =
            serde_json::from_str(r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#)
                .unwrap();
        assert!(matches!(stop, StreamInbound::Stop { .. }));

        let connected: StreamInbound =
            serde_json::from_str(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#)
                .unwrap();
        assert!(matches!(connected, StreamInbound::Connected { .. }));
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let frame: StreamInbound =
            serde_json::from_str(r#"{"event":"mark","mark":{"name":"greeting"}}"#).unwrap();
        assert!(matches!(frame, StreamInbound::Other));
    }

    #[test]
    fn test_outbound_media_serialization() {
        let frame = StreamOutbound::media("MZ1", "ZZZ=");
        let json = serde_json::to_string(&frame).expect("Should serialize");
        assert!(json.contains(r#""event":"media""#));
        assert!(json.contains(r#""streamSid":"MZ1""#));
        assert!(json.contains(r#""payload":"ZZZ=""#));
    }

    #[test]
    fn test_outbound_clear_serialization() {
        let frame = StreamOutbound::clear("MZ1");
        let json = serde_json::to_string(&frame).expect("Should serialize");
        assert!(json.contains(r#""event":"clear""#));
        assert!(json.contains(r#""streamSid":"MZ1""#));
    }

    #[test]
    fn test_plain_custom_parameters_resolve_unchanged() {
        let meta = StartMeta {
            custom_parameters: HashMap::from([
                ("name".to_string(), "Ada".to_string()),
                ("number".to_string(), "+15550000".to_string()),
            ]),
            ..Default::default()
        };

        let resolved = meta.resolved_custom_parameters();
        assert_eq!(resolved.get("name").unwrap(), "Ada");
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_legacy_base64_custom_parameters_merge() {
        let blob = BASE64_STANDARD.encode(r#"{"name":"Ada","airtableRecordId":"rec_9"}"#);
        let meta = StartMeta {
            custom_parameters: HashMap::from([
                ("customParameters".to_string(), blob),
                // Plain key wins over the decoded legacy value.
                ("name".to_string(), "Grace".to_string()),
            ]),
            ..Default::default()
        };

        let resolved = meta.resolved_custom_parameters();
        assert_eq!(resolved.get("name").unwrap(), "Grace");
        assert_eq!(resolved.get("airtableRecordId").unwrap(), "rec_9");
        assert!(!resolved.contains_key("customParameters"));
    }

    #[test]
    fn test_json_custom_params_merge() {
        let meta = StartMeta {
            custom_parameters: HashMap::from([
                (
                    "customParams".to_string(),
                    r#"{"campaign":"spring","attempt":2}"#.to_string(),
                ),
                ("name".to_string(), "Ada".to_string()),
            ]),
            ..Default::default()
        };

        let resolved = meta.resolved_custom_parameters();
        assert_eq!(resolved.get("campaign").unwrap(), "spring");
        assert_eq!(resolved.get("attempt").unwrap(), "2");
        assert_eq!(resolved.get("name").unwrap(), "Ada");
        assert!(!resolved.contains_key("customParams"));
    }

    #[test]
    fn test_malformed_legacy_blob_is_ignored() {
        let meta = StartMeta {
            custom_parameters: HashMap::from([(
                "customParameters".to_string(),
                "not-base64!!".to_string(),
            )]),
            ..Default::default()
        };

        assert!(meta.resolved_custom_parameters().is_empty());
    }
}
