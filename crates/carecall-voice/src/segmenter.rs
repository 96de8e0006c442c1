//! Silence-based segmentation of inbound call audio.
//!
//! The segmenter is a local heuristic that runs next to the streaming
//! transcriber on the same audio. The transcriber's finality flag remains the
//! authoritative utterance boundary; blocks emitted here are used for
//! telemetry and as a backstop.

use crate::codec;
use crate::config::SegmenterConfig;
use std::time::{Duration, Instant};

/// Why a block was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// No voiced chunk for the silence timeout.
    Silence,
    /// The block reached the maximum duration.
    MaxDuration,
}

/// Audio accumulated since the previous cut.
#[derive(Debug, Clone)]
pub struct UtteranceBlock {
    pub audio: Vec<u8>,
    pub started_at: Instant,
    pub last_voice_at: Instant,
    /// Wall-clock span from block start to the cut.
    pub duration: Duration,
    pub reason: CutReason,
}

/// Accumulates chunks and cuts a block on silence or maximum duration.
#[derive(Debug)]
pub struct AudioSegmenter {
    config: SegmenterConfig,
    buffer: Vec<u8>,
    block_start: Instant,
    last_voice: Instant,
}

impl AudioSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Creates a segmenter whose first block starts at `now`.
    pub fn starting_at(config: SegmenterConfig, now: Instant) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            block_start: now,
            last_voice: now,
        }
    }

    pub fn process_chunk(&mut self, chunk: &[u8]) -> Option<UtteranceBlock> {
        self.process_chunk_at(chunk, Instant::now())
    }

    /// Appends `chunk` observed at `now` and returns a block if a cut condition holds.
    pub fn process_chunk_at(&mut self, chunk: &[u8], now: Instant) -> Option<UtteranceBlock> {
        if codec::is_voice(chunk, self.config.encoding, self.config.energy_threshold) {
            self.last_voice = now;
        }
        self.buffer.extend_from_slice(chunk);

        let silent_for = now.saturating_duration_since(self.last_voice);
        let elapsed = now.saturating_duration_since(self.block_start);

        let reason = if silent_for >= self.config.silence_timeout() {
            CutReason::Silence
        } else if elapsed >= self.config.max_block() {
            CutReason::MaxDuration
        } else {
            return None;
        };

        let block = UtteranceBlock {
            audio: std::mem::take(&mut self.buffer),
            started_at: self.block_start,
            last_voice_at: self.last_voice,
            duration: elapsed,
            reason,
        };
        self.block_start = now;
        self.last_voice = now;
        Some(block)
    }

    /// Bytes buffered in the current, still-open block.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
