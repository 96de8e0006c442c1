use super::frames::AudioFrame;
use crate::error::SinkError;
use async_trait::async_trait;
use std::fmt;

/// Playback markers sent after the audio of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// All frames of the reply were delivered.
    End,
    /// Synthesis failed part-way; some or none of the audio went out.
    Error,
    /// The reply was interrupted before it finished.
    Cancelled,
}

impl Marker {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for paced outbound audio, typically the caller's media stream.
///
/// Frames passed in one call form a single transport send and must be
/// delivered in order.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frames(&mut self, frames: &[AudioFrame]) -> Result<(), SinkError>;

    async fn send_marker(&mut self, marker: Marker) -> Result<(), SinkError>;
}

/// A sink that records everything it receives. Used by tests and for dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sends: Vec<Vec<AudioFrame>>,
    pub markers: Vec<Marker>,
}

impl RecordingSink {
    pub fn frame_count(&self) -> usize {
        self.sends.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frames(&mut self, frames: &[AudioFrame]) -> Result<(), SinkError> {
        self.sends.push(frames.to_vec());
        Ok(())
    }

    async fn send_marker(&mut self, marker: Marker) -> Result<(), SinkError> {
        self.markers.push(marker);
        Ok(())
    }
}
