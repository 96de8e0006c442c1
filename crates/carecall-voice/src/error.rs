use std::time::Duration;
use thiserror::Error;

/// Failure to establish a provider session. Fatal for the call leg that
/// attempted it; nothing in this crate retries.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("invalid provider endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("provider connection timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("provider handshake failed: {0}")]
    Handshake(String),

    #[error("transcriber was already started")]
    AlreadyStarted,
}

/// Failure of an established provider session.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider closed the stream: {0}")]
    ProviderClosed(String),

    #[error("provider reported an error: {0}")]
    Provider(String),
}

/// Failure to deliver a frame or marker to the telephony transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("transport sink is closed")]
    Closed,

    #[error("failed to encode outbound message: {0}")]
    Encode(String),
}

/// Failure to synthesize or deliver a reply.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("TTS connection failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("TTS request failed: {0}")]
    Request(String),

    #[error("TTS provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("TTS stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("TTS provider returned no audio")]
    EmptyAudio,

    #[error("nothing to synthesize")]
    EmptyText,

    #[error("frame delivery failed: {0}")]
    Sink(#[from] SinkError),
}

impl SynthesisError {
    /// Whether the failure happened before any audio could be requested,
    /// which is what makes a fallback transport worth trying.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}
