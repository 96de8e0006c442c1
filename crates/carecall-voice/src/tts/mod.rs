//! Reply synthesis: provider transports, framing, pacing and delivery.

pub mod breaker;
pub mod frames;
pub mod pacing;
pub mod sink;
pub mod synthesizer;
pub mod transport;

pub use breaker::CircuitBreaker;
pub use frames::{split_into_frames, AudioFrame, FrameLayout};
pub use pacing::Pacer;
pub use sink::{FrameSink, Marker, RecordingSink};
pub use synthesizer::{Completed, StreamingSynthesizer};
pub use transport::{
    build_transport, AudioStream, FallbackTransport, HttpTransport, TtsTransport,
    WebSocketTransport,
};
