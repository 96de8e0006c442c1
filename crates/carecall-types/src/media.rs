//! Telephony media-stream wire messages.
//!
//! The telephony provider opens a WebSocket and exchanges JSON envelopes
//! tagged by an `event` field. Inbound audio arrives as base64 μ-law in
//! `media` events; outbound audio uses the same envelope, and `mark` events
//! delimit playback so the provider can echo them back once played.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Audio format announced in the `start` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
        }
    }
}

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartMetadata {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub tracks: Vec<String>,
    pub media_format: MediaFormat,
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Control and media messages received from the telephony transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkPayload,
    },
    /// Any event type this server does not act on (e.g. `dtmf`).
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Resolves the stream identifier of a `start` event.
    ///
    /// Providers put it at the top level; some test harnesses only fill the
    /// nested `start.streamSid`, so both are accepted.
    pub fn start_stream_sid(&self) -> Option<&str> {
        match self {
            Self::Start { stream_sid, start } => stream_sid
                .as_deref()
                .or(start.stream_sid.as_deref())
                .filter(|sid| !sid.is_empty()),
            _ => None,
        }
    }
}

/// Messages sent to the telephony transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Asks the transport to drop any audio it has buffered but not played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event_with_nested_metadata() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"clinic": "north"}
            },
            "streamSid": "MZ1"
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.start_stream_sid(), Some("MZ1"));
        match event {
            InboundEvent::Start { start, .. } => {
                assert_eq!(start.call_sid.as_deref(), Some("CA1"));
                assert_eq!(start.media_format.sample_rate, 8000);
                assert_eq!(start.custom_parameters["clinic"], "north");
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn start_stream_sid_falls_back_to_nested_field() {
        let raw = r#"{"event":"start","start":{"streamSid":"CA1"}}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.start_stream_sid(), Some("CA1"));
    }

    #[test]
    fn unknown_events_are_tolerated() {
        let raw = r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, InboundEvent::Unknown);
    }

    #[test]
    fn outbound_media_uses_transport_envelope() {
        let json = serde_json::to_value(OutboundEvent::media("MZ1", "AAAA".to_string())).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1");
        assert_eq!(json["media"]["payload"], "AAAA");

        let json = serde_json::to_value(OutboundEvent::mark("MZ1", "end")).unwrap();
        assert_eq!(json["event"], "mark");
        assert_eq!(json["mark"]["name"], "end");

        let json = serde_json::to_value(OutboundEvent::clear("MZ1")).unwrap();
        assert_eq!(json["event"], "clear");
    }
}
