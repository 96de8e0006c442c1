//! Server configuration loading from file and environment variables.

use carecall_voice::{SegmenterConfig, SttConfig, TtsConfig};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech-to-text provider.
    #[serde(default)]
    pub stt: SttConfig,

    /// Text-to-speech provider and outbound pacing.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Local silence segmentation of inbound audio.
    #[serde(default)]
    pub segmenter: SegmenterConfig,

    /// Per-call turn-taking behaviour.
    #[serde(default)]
    pub call: CallConfig,

    /// Reply generator endpoint.
    #[serde(default)]
    pub reply: ReplyConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (e.g. `https://carecall.example.org`).
    /// Used to build the media-stream URL handed to the telephony provider;
    /// when unset, the request's `Host` header is used instead.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "carecall_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Turn-taking settings for phone calls.
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    /// Finals arriving within this window of the last accepted final are dropped.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// A partial transcript followed by this much transcript silence is
    /// treated as final. Zero disables promotion.
    #[serde(default = "default_partial_idle_ms")]
    pub partial_idle_ms: u64,

    /// Let caller speech interrupt a reply that is playing.
    #[serde(default)]
    pub barge_in: bool,

    /// Discard the call's session state when the call ends.
    #[serde(default = "default_true")]
    pub evict_on_close: bool,

    /// Pause after a farewell finishes before hanging up, so the last
    /// buffered audio can play out.
    #[serde(default = "default_hangup_grace_ms")]
    pub hangup_grace_ms: u64,

    /// Name spoken in the greeting.
    #[serde(default = "default_practice_name")]
    pub practice_name: String,
}

/// Chat-completions endpoint used to generate replies.
#[derive(Clone, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_reply_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_reply_model")]
    pub model: String,

    /// Instructions prepended to every conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Most recent turns sent with each request.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    #[serde(default = "default_reply_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_partial_idle_ms() -> u64 {
    1_500
}

fn default_hangup_grace_ms() -> u64 {
    500
}

fn default_practice_name() -> String {
    "the clinic".to_string()
}

fn default_reply_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_reply_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_history_turns() -> usize {
    20
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            partial_idle_ms: default_partial_idle_ms(),
            barge_in: false,
            evict_on_close: true,
            hangup_grace_ms: default_hangup_grace_ms(),
            practice_name: default_practice_name(),
        }
    }
}

impl CallConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// `None` when partial promotion is disabled.
    pub fn partial_idle(&self) -> Option<Duration> {
        (self.partial_idle_ms > 0).then(|| Duration::from_millis(self.partial_idle_ms))
    }

    pub fn hangup_grace(&self) -> Duration {
        Duration::from_millis(self.hangup_grace_ms)
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            url: default_reply_url(),
            api_key: String::new(),
            model: default_reply_model(),
            system_prompt: None,
            temperature: default_temperature(),
            max_history_turns: default_max_history_turns(),
            timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl ReplyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for ReplyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("temperature", &self.temperature)
            .field("max_history_turns", &self.max_history_turns)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CARECALL_HOST` overrides `server.host`
/// - `CARECALL_PORT` overrides `server.port`
/// - `CARECALL_PUBLIC_URL` overrides `server.public_url`
/// - `CARECALL_LOG_LEVEL` overrides `logging.level`
/// - `CARECALL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `DEEPGRAM_API_KEY` overrides `stt.api_key`
/// - `ELEVENLABS_API_KEY` overrides `tts.api_key`
/// - `CARECALL_LLM_API_KEY` overrides `reply.api_key`
/// - `CARECALL_LLM_URL` overrides `reply.url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides, reading variables through `lookup`.
/// Unparseable values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("CARECALL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CARECALL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("CARECALL_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(level) = lookup("CARECALL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CARECALL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = lookup("DEEPGRAM_API_KEY") {
        config.stt.api_key = key;
    }
    if let Some(key) = lookup("ELEVENLABS_API_KEY") {
        config.tts.api_key = key;
    }
    if let Some(key) = lookup("CARECALL_LLM_API_KEY") {
        config.reply.api_key = key;
    }
    if let Some(url) = lookup("CARECALL_LLM_URL") {
        config.reply.url = url;
    }
}
