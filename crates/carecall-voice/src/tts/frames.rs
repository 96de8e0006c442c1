//! Fixed-duration telephony frames and WAV container stripping.

use crate::config::PacingConfig;
use tracing::warn;

/// One frame of transport-encoded audio, exactly `FrameLayout::frame_bytes` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(pub Vec<u8>);

impl AudioFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Frame geometry derived from the pacing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub frame_bytes: usize,
    pub pad_byte: u8,
}

impl FrameLayout {
    pub fn from_config(config: &PacingConfig) -> Self {
        let samples = (config.sample_rate as usize * config.frame_ms as usize) / 1000;
        Self {
            frame_bytes: (samples * config.encoding.bytes_per_sample()).max(1),
            pad_byte: config.encoding.silence_byte(),
        }
    }
}

/// Cuts a byte stream into frames, carrying remainders across pushes.
#[derive(Debug)]
pub struct Framer {
    layout: FrameLayout,
    pending: Vec<u8>,
}

impl Framer {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            pending: Vec::with_capacity(layout.frame_bytes),
        }
    }

    /// Appends bytes and returns every frame that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / self.layout.frame_bytes;
        let mut frames = Vec::with_capacity(whole);
        let mut rest = self.pending.split_off(whole * self.layout.frame_bytes);
        std::mem::swap(&mut rest, &mut self.pending);
        for chunk in rest.chunks_exact(self.layout.frame_bytes) {
            frames.push(AudioFrame(chunk.to_vec()));
        }
        frames
    }

    /// Pads any remainder with silence into a final frame.
    pub fn finish(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut last = std::mem::take(&mut self.pending);
        last.resize(self.layout.frame_bytes, self.layout.pad_byte);
        Some(AudioFrame(last))
    }
}

/// Splits a complete buffer into frames, padding the last one with silence.
pub fn split_into_frames(audio: &[u8], layout: FrameLayout) -> Vec<AudioFrame> {
    let mut framer = Framer::new(layout);
    let mut frames = framer.push(audio);
    frames.extend(framer.finish());
    frames
}

#[derive(Debug)]
enum WavState {
    /// Collecting the first bytes to decide whether a RIFF header is present.
    Sniffing,
    /// Inside a RIFF container, looking for the `data` subchunk.
    Header,
    Passthrough,
}

/// Longest RIFF header held back while looking for the `data` chunk.
const MAX_HEADER_BYTES: usize = 4096;

/// Removes a leading RIFF/WAVE header from streamed audio.
///
/// Providers asked for raw telephony audio sometimes wrap it in a WAV
/// container anyway. Non-WAV streams pass through unchanged.
#[derive(Debug)]
pub struct WavHeaderStripper {
    state: WavState,
    held: Vec<u8>,
}

impl Default for WavHeaderStripper {
    fn default() -> Self {
        Self::new()
    }
}

impl WavHeaderStripper {
    pub fn new() -> Self {
        Self {
            state: WavState::Sniffing,
            held: Vec::new(),
        }
    }

    /// Feeds bytes and returns the audio payload that can be released.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.state {
            WavState::Passthrough => return bytes.to_vec(),
            WavState::Sniffing | WavState::Header => self.held.extend_from_slice(bytes),
        }

        if matches!(self.state, WavState::Sniffing) {
            if self.held.len() < 12 {
                if b"RIFF".starts_with(&self.held[..self.held.len().min(4)]) {
                    return Vec::new();
                }
                self.state = WavState::Passthrough;
                return std::mem::take(&mut self.held);
            }
            if &self.held[0..4] == b"RIFF" && &self.held[8..12] == b"WAVE" {
                self.state = WavState::Header;
            } else {
                self.state = WavState::Passthrough;
                return std::mem::take(&mut self.held);
            }
        }

        // Walk subchunks after the 12-byte RIFF preamble until `data` is found.
        let mut offset = 12;
        while offset + 8 <= self.held.len() {
            let id = &self.held[offset..offset + 4];
            let size = u32::from_le_bytes([
                self.held[offset + 4],
                self.held[offset + 5],
                self.held[offset + 6],
                self.held[offset + 7],
            ]) as usize;
            if id == b"data" {
                self.state = WavState::Passthrough;
                let payload = self.held.split_off(offset + 8);
                self.held.clear();
                return payload;
            }
            // Subchunks are word-aligned.
            offset += 8 + size + (size & 1);
        }
        if self.held.len() > MAX_HEADER_BYTES {
            // No `data` chunk in sight: stop buffering and pass later bytes on.
            warn!(held = self.held.len(), "WAV header without data chunk, passing audio through");
            self.state = WavState::Passthrough;
            self.held = Vec::new();
        }
        Vec::new()
    }

    /// Releases anything still held at end of stream.
    ///
    /// A stream that never grew past its sniff window is returned as-is; an
    /// unterminated RIFF header carries no playable audio.
    pub fn finish(&mut self) -> Vec<u8> {
        match self.state {
            WavState::Sniffing => {
                self.state = WavState::Passthrough;
                std::mem::take(&mut self.held)
            }
            WavState::Header => {
                self.held.clear();
                Vec::new()
            }
            WavState::Passthrough => Vec::new(),
        }
    }
}
