use crate::codec::SampleEncoding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_stt_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_stt_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_stt_encoding() -> String {
    "mulaw".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_true() -> bool {
    true
}

fn default_stt_connect_timeout_ms() -> u64 {
    5_000
}

fn default_keepalive_secs() -> u64 {
    8
}

/// Streaming speech-to-text provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Live transcription WebSocket endpoint.
    #[serde(default = "default_stt_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Provider encoding name for the inbound audio.
    #[serde(default = "default_stt_encoding")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_true")]
    pub interim_results: bool,
    #[serde(default = "default_true")]
    pub punctuate: bool,
    /// Provider-side endpointing in milliseconds. `None` leaves the provider default.
    #[serde(default)]
    pub endpointing_ms: Option<u32>,
    #[serde(default = "default_stt_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Interval between keep-alive messages. Zero disables them.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: String::new(),
            model: default_stt_model(),
            language: default_language(),
            encoding: default_stt_encoding(),
            sample_rate: default_sample_rate(),
            interim_results: true,
            punctuate: true,
            endpointing_ms: None,
            connect_timeout_ms: default_stt_connect_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("encoding", &self.encoding)
            .field("sample_rate", &self.sample_rate)
            .field("interim_results", &self.interim_results)
            .field("punctuate", &self.punctuate)
            .field("endpointing_ms", &self.endpointing_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

impl SttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_tts_streaming_url() -> String {
    "wss://api.elevenlabs.io/v1/text-to-speech".to_string()
}

fn default_tts_http_url() -> String {
    "https://api.elevenlabs.io/v1/text-to-speech".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_speed() -> f32 {
    1.0
}

fn default_tts_connect_timeout_ms() -> u64 {
    10_000
}

fn default_tts_request_timeout_ms() -> u64 {
    30_000
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Text-to-speech provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Base URL of the WebSocket streaming endpoint; `/{voice_id}/stream-input` is appended.
    #[serde(default = "default_tts_streaming_url")]
    pub streaming_url: String,
    /// Base URL of the buffered HTTP endpoint; `/{voice_id}` is appended.
    #[serde(default = "default_tts_http_url")]
    pub http_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    /// Provider output format; must match the transport's encoding.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Try the WebSocket transport before the HTTP one.
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,
    #[serde(default = "default_tts_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_tts_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive streaming connect failures before the streaming transport is skipped.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
    #[serde(default)]
    pub pacing: PacingConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            streaming_url: default_tts_streaming_url(),
            http_url: default_tts_http_url(),
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_tts_model(),
            output_format: default_output_format(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            speed: default_speed(),
            streaming_enabled: true,
            connect_timeout_ms: default_tts_connect_timeout_ms(),
            request_timeout_ms: default_tts_request_timeout_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            pacing: PacingConfig::default(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("streaming_url", &self.streaming_url)
            .field("http_url", &self.http_url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("stability", &self.stability)
            .field("similarity_boost", &self.similarity_boost)
            .field("speed", &self.speed)
            .field("streaming_enabled", &self.streaming_enabled)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("breaker_threshold", &self.breaker_threshold)
            .field("breaker_cooldown_secs", &self.breaker_cooldown_secs)
            .field("pacing", &self.pacing)
            .finish()
    }
}

impl TtsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

fn default_frame_ms() -> u32 {
    20
}

fn default_frames_per_group() -> usize {
    5
}

fn default_max_ahead_ms() -> u64 {
    200
}

/// Outbound frame size and delivery pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
    /// Frames bundled into a single transport send.
    #[serde(default = "default_frames_per_group")]
    pub frames_per_group: usize,
    /// How far audio delivery may run ahead of real time.
    #[serde(default = "default_max_ahead_ms")]
    pub max_ahead_ms: u64,
    #[serde(default)]
    pub encoding: SampleEncoding,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
            frames_per_group: default_frames_per_group(),
            max_ahead_ms: default_max_ahead_ms(),
            encoding: SampleEncoding::default(),
        }
    }
}

impl PacingConfig {
    pub fn max_ahead(&self) -> Duration {
        Duration::from_millis(self.max_ahead_ms)
    }
}

fn default_silence_ms() -> u64 {
    2_000
}

fn default_max_block_ms() -> u64 {
    10_000
}

fn default_energy_threshold() -> f64 {
    8.0
}

/// Local silence heuristics for the inbound audio segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Silence after the last voiced chunk that closes a block.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// Hard cap on block length.
    #[serde(default = "default_max_block_ms")]
    pub max_block_ms: u64,
    /// Mean amplitude deviation, in 8-bit units (0-128), above which a chunk counts as voice.
    #[serde(default = "default_energy_threshold")]
    pub energy_threshold: f64,
    #[serde(default)]
    pub encoding: SampleEncoding,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            max_block_ms: default_max_block_ms(),
            energy_threshold: default_energy_threshold(),
            encoding: SampleEncoding::default(),
        }
    }
}

impl SegmenterConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn max_block(&self) -> Duration {
        Duration::from_millis(self.max_block_ms)
    }
}
