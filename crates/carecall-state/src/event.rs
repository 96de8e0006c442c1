//! Latency telemetry records and the well-known mark names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telemetry marks emitted over the life of a call.
///
/// Each mark is recorded once per occurrence with a monotonic offset from the
/// session's creation, so differences between marks give pipeline latencies
/// (e.g. `stt_final` → `tts_first_frame` is the caller-perceived reply delay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMark {
    CallStart,
    GreetingStart,
    SttConnected,
    SttFinal,
    ReplyStart,
    ReplyReady,
    TtsStart,
    TtsFirstFrame,
    TtsComplete,
    TtsError,
    TurnCancelled,
    UtteranceBlock,
    PlaybackMark,
    CallEnd,
}

impl LatencyMark {
    pub const ALL: [LatencyMark; 14] = [
        Self::CallStart,
        Self::GreetingStart,
        Self::SttConnected,
        Self::SttFinal,
        Self::ReplyStart,
        Self::ReplyReady,
        Self::TtsStart,
        Self::TtsFirstFrame,
        Self::TtsComplete,
        Self::TtsError,
        Self::TurnCancelled,
        Self::UtteranceBlock,
        Self::PlaybackMark,
        Self::CallEnd,
    ];

    /// Returns the canonical string label for this mark.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CallStart => "call_start",
            Self::GreetingStart => "greeting_start",
            Self::SttConnected => "stt_connected",
            Self::SttFinal => "stt_final",
            Self::ReplyStart => "reply_start",
            Self::ReplyReady => "reply_ready",
            Self::TtsStart => "tts_start",
            Self::TtsFirstFrame => "tts_first_frame",
            Self::TtsComplete => "tts_complete",
            Self::TtsError => "tts_error",
            Self::TurnCancelled => "turn_cancelled",
            Self::UtteranceBlock => "utterance_block",
            Self::PlaybackMark => "playback_mark",
            Self::CallEnd => "call_end",
        }
    }
}

impl std::fmt::Display for LatencyMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LatencyMark {
    type Err = ParseLatencyMarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mark| mark.as_str() == s)
            .ok_or_else(|| ParseLatencyMarkError(s.to_string()))
    }
}

/// Error returned when parsing an unknown mark name.
#[derive(Debug, Clone)]
pub struct ParseLatencyMarkError(pub String);

impl std::fmt::Display for ParseLatencyMarkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown latency mark: {}", self.0)
    }
}

impl std::error::Error for ParseLatencyMarkError {}

/// One entry of a session's append-only telemetry list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEvent {
    pub name: String,
    /// Milliseconds since the session entry was created, on a monotonic clock.
    pub at_ms: u64,
    /// Wall-clock time of the recording, for correlating with provider logs.
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
