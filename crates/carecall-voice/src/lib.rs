//! Telephony audio pipeline for CareCall.
//!
//! Inbound caller audio is segmented locally ([`segmenter`]) and streamed to a
//! speech-to-text provider ([`stt`]). Reply text is synthesized by a
//! text-to-speech provider and delivered back as paced 20ms frames ([`tts`]).
//! Provider connections are WebSockets; the TTS path falls back to HTTP when
//! streaming cannot connect.

pub mod codec;
pub mod config;
pub mod error;
pub mod segmenter;
pub mod stt;
pub mod tts;

pub use codec::SampleEncoding;
pub use config::{PacingConfig, SegmenterConfig, SttConfig, TtsConfig};
pub use error::{ConnectError, SinkError, StreamError, SynthesisError};
pub use segmenter::{AudioSegmenter, CutReason, UtteranceBlock};
pub use stt::{StreamingTranscriber, TranscriberEvent, TranscriberState};
pub use tts::{AudioFrame, Completed, FrameSink, Marker, StreamingSynthesizer};
