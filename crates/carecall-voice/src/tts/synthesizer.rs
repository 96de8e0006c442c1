use super::frames::{AudioFrame, FrameLayout, Framer, WavHeaderStripper};
use super::pacing::Pacer;
use super::sink::{FrameSink, Marker};
use super::transport::{build_transport, TtsTransport};
use crate::config::{PacingConfig, TtsConfig};
use crate::error::SynthesisError;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a fully delivered reply.
#[derive(Debug, Clone)]
pub struct Completed {
    pub frames: usize,
    /// Transport sends issued, each carrying up to `frames_per_group` frames.
    pub groups: usize,
    /// Playback length of the delivered audio.
    pub audio: Duration,
    /// Time from the request to the end marker.
    pub elapsed: Duration,
    /// Time from the request to the first frame send.
    pub first_frame: Option<Duration>,
    pub transport: &'static str,
}

/// Turns reply text into paced telephony frames on a [`FrameSink`].
///
/// Frames go out in groups, in provider order, never more than the
/// configured lead ahead of real time. A successful reply ends with an `end`
/// marker; a failed one ends with an `error` marker after whatever audio was
/// already delivered.
pub struct StreamingSynthesizer {
    transport: Box<dyn TtsTransport>,
    pacing: PacingConfig,
    layout: FrameLayout,
}

struct Delivery<'a, S: FrameSink + ?Sized> {
    sink: &'a mut S,
    pacer: Pacer,
    group: Vec<AudioFrame>,
    group_size: usize,
    frames: usize,
    groups: usize,
    started: Instant,
    first_frame: Option<Duration>,
}

impl<S: FrameSink + ?Sized> Delivery<'_, S> {
    async fn push(&mut self, frame: AudioFrame) -> Result<(), SynthesisError> {
        self.group.push(frame);
        if self.group.len() >= self.group_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SynthesisError> {
        if self.group.is_empty() {
            return Ok(());
        }
        self.pacer.wait_turn().await;
        self.sink.send_frames(&self.group).await?;
        self.pacer.record(self.group.len());
        if self.first_frame.is_none() {
            self.first_frame = Some(self.started.elapsed());
        }
        self.frames += self.group.len();
        self.groups += 1;
        self.group.clear();
        Ok(())
    }
}

impl StreamingSynthesizer {
    pub fn new(transport: Box<dyn TtsTransport>, pacing: PacingConfig) -> Self {
        let layout = FrameLayout::from_config(&pacing);
        Self {
            transport,
            pacing,
            layout,
        }
    }

    /// Builds a synthesizer with the transport chain described by `config`.
    pub fn from_config(config: &TtsConfig) -> Result<Self, SynthesisError> {
        Ok(Self::new(build_transport(config)?, config.pacing.clone()))
    }

    pub fn frame_layout(&self) -> FrameLayout {
        self.layout
    }

    pub async fn synthesize_and_stream<S: FrameSink + ?Sized>(
        &self,
        text: &str,
        sink: &mut S,
    ) -> Result<Completed, SynthesisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let started = Instant::now();
        let mut delivery = Delivery {
            sink,
            pacer: Pacer::new(&self.pacing),
            group: Vec::with_capacity(self.pacing.frames_per_group.max(1)),
            group_size: self.pacing.frames_per_group.max(1),
            frames: 0,
            groups: 0,
            started,
            first_frame: None,
        };

        match self.deliver(text, &mut delivery).await {
            Ok(()) => {
                let completed = Completed {
                    frames: delivery.frames,
                    groups: delivery.groups,
                    audio: delivery.pacer.sent(),
                    elapsed: started.elapsed(),
                    first_frame: delivery.first_frame,
                    transport: self.transport.name(),
                };
                info!(
                    transport = completed.transport,
                    frames = completed.frames,
                    elapsed_ms = completed.elapsed.as_millis() as u64,
                    "TTS reply delivered"
                );
                Ok(completed)
            }
            Err(e) => {
                warn!(
                    transport = self.transport.name(),
                    frames_sent = delivery.frames,
                    "TTS reply failed: {}",
                    e
                );
                if let Err(sink_err) = delivery.sink.send_marker(Marker::Error).await {
                    debug!("error marker not delivered: {}", sink_err);
                }
                Err(e)
            }
        }
    }

    async fn deliver<S: FrameSink + ?Sized>(
        &self,
        text: &str,
        delivery: &mut Delivery<'_, S>,
    ) -> Result<(), SynthesisError> {
        let mut audio = self.transport.open(text).await?;
        let mut stripper = WavHeaderStripper::new();
        let mut framer = Framer::new(self.layout);

        while let Some(chunk) = audio.next().await {
            let payload = stripper.push(&chunk?);
            for frame in framer.push(&payload) {
                delivery.push(frame).await?;
            }
        }
        for frame in framer.push(&stripper.finish()) {
            delivery.push(frame).await?;
        }
        if let Some(last) = framer.finish() {
            delivery.push(last).await?;
        }
        delivery.flush().await?;

        if delivery.frames == 0 {
            return Err(SynthesisError::EmptyAudio);
        }

        // The end marker comes back from the transport once playback reaches
        // it, so it is paced like audio.
        delivery.pacer.wait_turn().await;
        delivery.sink.send_marker(Marker::End).await?;
        Ok(())
    }
}
