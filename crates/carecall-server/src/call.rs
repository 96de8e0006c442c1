//! Per-call state machine tying the telephony stream to the voice pipeline.
//!
//! One [`CallSessionManager`] runs per media-stream WebSocket. It owns the
//! call's segmenter and transcriber, accepts final transcripts (debounced),
//! and runs at most one turn at a time: reply generation followed by paced
//! synthesis back onto the stream. Turns run as separate tasks so inbound
//! audio keeps flowing while a reply plays; the manager learns of their end
//! through a channel and can abort them at any await point.

use crate::greeting;
use crate::reply::generate_with_timeout;
use crate::AppState;
use async_trait::async_trait;
use axum::extract::ws::Message;
use base64::Engine;
use carecall_state::{LatencyMark, SessionStore};
use carecall_types::{ChatTurn, InboundEvent, OutboundEvent, StartMetadata, TranscriptEvent};
use carecall_voice::{
    AudioFrame, AudioSegmenter, FrameSink, Marker, SinkError, StreamingTranscriber,
    TranscriberEvent,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// The WebSocket was upgraded but is not yet being read.
    Accepted,
    /// Waiting for the transport's `start` event.
    AwaitingStreamStart,
    Active,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Greeting,
    Reply,
    /// Apology before hanging up; the call ends once it has played.
    Farewell,
}

impl TurnKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Reply => "reply",
            Self::Farewell => "farewell",
        }
    }
}

struct ActiveTurn {
    id: u64,
    kind: TurnKind,
    handle: JoinHandle<()>,
}

struct TurnOutcome {
    id: u64,
    delivered: bool,
}

/// Delivers synthesized frames and markers onto a call's outbound channel.
///
/// Every frame becomes its own `media` message, so an aborted turn never
/// leaves a partial frame on the wire.
pub struct CallSink {
    stream_sid: String,
    outbound: mpsc::Sender<String>,
    sessions: Arc<SessionStore>,
    first_frame_seen: bool,
}

impl CallSink {
    pub fn new(stream_sid: String, outbound: mpsc::Sender<String>, sessions: Arc<SessionStore>) -> Self {
        Self {
            stream_sid,
            outbound,
            sessions,
            first_frame_seen: false,
        }
    }

    async fn send_event(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        let text = serde_json::to_string(event).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.outbound.send(text).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl FrameSink for CallSink {
    async fn send_frames(&mut self, frames: &[AudioFrame]) -> Result<(), SinkError> {
        for frame in frames {
            let payload = base64::engine::general_purpose::STANDARD.encode(frame.as_bytes());
            self.send_event(&OutboundEvent::media(&self.stream_sid, payload))
                .await?;
        }
        if !self.first_frame_seen && !frames.is_empty() {
            self.first_frame_seen = true;
            self.sessions.emit_latency_event(
                &self.stream_sid,
                LatencyMark::TtsFirstFrame.as_str(),
                json!({}),
            );
        }
        Ok(())
    }

    async fn send_marker(&mut self, marker: Marker) -> Result<(), SinkError> {
        self.send_event(&OutboundEvent::mark(&self.stream_sid, marker.as_str()))
            .await
    }
}

fn emit(state: &AppState, stream_sid: &str, mark: LatencyMark, metadata: Value) {
    state
        .sessions
        .emit_latency_event(stream_sid, mark.as_str(), metadata);
}

/// Generates the reply for the session's latest user turn. Failures become
/// a spoken apology so the caller is never left in silence.
async fn compose_reply(state: &AppState, stream_sid: &str) -> String {
    emit(state, stream_sid, LatencyMark::ReplyStart, json!({}));
    let history = state.sessions.history(stream_sid);
    match generate_with_timeout(state.reply.as_ref(), &state.config.reply, stream_sid, &history).await {
        Ok(text) => {
            emit(state, stream_sid, LatencyMark::ReplyReady, json!({ "chars": text.len() }));
            state.sessions.append_turn(stream_sid, ChatTurn::assistant(text.clone()));
            text
        }
        Err(e) => {
            warn!(stream_sid = %stream_sid, "reply generation failed: {}", e);
            emit(
                state,
                stream_sid,
                LatencyMark::ReplyReady,
                json!({ "degraded": true, "error": e.to_string() }),
            );
            state
                .sessions
                .append_turn(stream_sid, ChatTurn::assistant(greeting::REPLY_FAILURE));
            greeting::REPLY_FAILURE.to_string()
        }
    }
}

/// Synthesizes `text` onto the call. Returns whether all audio was delivered.
async fn speak(state: &AppState, stream_sid: &str, outbound: mpsc::Sender<String>, text: &str) -> bool {
    emit(state, stream_sid, LatencyMark::TtsStart, json!({ "chars": text.len() }));
    let mut sink = CallSink::new(stream_sid.to_string(), outbound, state.sessions.clone());
    match state.synthesizer.synthesize_and_stream(text, &mut sink).await {
        Ok(done) => {
            emit(
                state,
                stream_sid,
                LatencyMark::TtsComplete,
                json!({
                    "frames": done.frames,
                    "audio_ms": done.audio.as_millis() as u64,
                    "elapsed_ms": done.elapsed.as_millis() as u64,
                    "transport": done.transport,
                }),
            );
            true
        }
        Err(e) => {
            warn!(stream_sid = %stream_sid, "reply synthesis failed: {}", e);
            emit(state, stream_sid, LatencyMark::TtsError, json!({ "error": e.to_string() }));
            false
        }
    }
}

/// Drives one call from `start` to hang-up.
pub struct CallSessionManager {
    state: Arc<AppState>,
    phase: CallPhase,
    stream_sid: Option<String>,
    registered: bool,
    outbound: mpsc::Sender<String>,
    segmenter: AudioSegmenter,
    transcriber: Option<StreamingTranscriber>,
    transcript_tx: mpsc::Sender<TranscriberEvent>,
    transcript_rx: mpsc::Receiver<TranscriberEvent>,
    turn_tx: mpsc::Sender<TurnOutcome>,
    turn_rx: mpsc::Receiver<TurnOutcome>,
    turn: Option<ActiveTurn>,
    next_turn_id: u64,
    greeted: bool,
    last_accepted_final: Option<Instant>,
    pending_partial: Option<(String, Instant)>,
    farewell_pending: bool,
    farewell_started: bool,
}

impl CallSessionManager {
    pub fn new(state: Arc<AppState>, outbound: mpsc::Sender<String>) -> Self {
        let (transcript_tx, transcript_rx) = mpsc::channel(64);
        let (turn_tx, turn_rx) = mpsc::channel(4);
        let segmenter = AudioSegmenter::new(state.config.segmenter.clone());
        Self {
            state,
            phase: CallPhase::Accepted,
            stream_sid: None,
            registered: false,
            outbound,
            segmenter,
            transcriber: None,
            transcript_tx,
            transcript_rx,
            turn_tx,
            turn_rx,
            turn: None,
            next_turn_id: 0,
            greeted: false,
            last_accepted_final: None,
            pending_partial: None,
            farewell_pending: false,
            farewell_started: false,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Runs the call until the transport stops, disconnects, or the call
    /// hangs itself up, then tears everything down.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        self.phase = CallPhase::AwaitingStreamStart;

        while matches!(self.phase, CallPhase::AwaitingStreamStart | CallPhase::Active) {
            let promote_at = self.pending_partial.as_ref().map(|(_, at)| *at);
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(stream_sid = ?self.stream_sid, "media stream disconnected");
                        self.phase = CallPhase::ShuttingDown;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(stream_sid = ?self.stream_sid, "media stream error: {}", e);
                        self.phase = CallPhase::ShuttingDown;
                    }
                },
                Some(event) = self.transcript_rx.recv() => self.on_transcriber_event(event),
                Some(outcome) = self.turn_rx.recv() => self.on_turn_done(outcome),
                _ = tokio::time::sleep_until(promote_at.unwrap_or_else(Instant::now)), if promote_at.is_some() => {
                    self.promote_partial();
                }
            }
        }

        if self.farewell_started && self.turn.is_none() {
            tokio::time::sleep(self.state.config.call.hangup_grace()).await;
        }
        self.shutdown();
    }

    /// Handles one text frame from the transport.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => debug!(stream_sid = ?self.stream_sid, "ignoring unparseable media message: {}", e),
        }
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        let start_sid = event.start_stream_sid().map(str::to_string);
        match event {
            InboundEvent::Connected { protocol } => {
                debug!(protocol = ?protocol, "media stream connected");
            }
            InboundEvent::Start { start, .. } => self.on_start(start_sid, start).await,
            InboundEvent::Media { media, .. } => self.on_media(&media.payload),
            InboundEvent::Stop { .. } => {
                info!(stream_sid = ?self.stream_sid, "media stream stopped");
                self.phase = CallPhase::ShuttingDown;
            }
            InboundEvent::Mark { mark, .. } => {
                if let Some(sid) = &self.stream_sid {
                    emit(&self.state, sid, LatencyMark::PlaybackMark, json!({ "name": mark.name }));
                }
            }
            InboundEvent::Unknown => {}
        }
    }

    async fn on_start(&mut self, sid: Option<String>, start: StartMetadata) {
        if self.phase != CallPhase::AwaitingStreamStart {
            warn!(stream_sid = ?self.stream_sid, phase = ?self.phase, "ignoring repeated start event");
            return;
        }
        let Some(sid) = sid else {
            warn!("start event without a stream id, closing");
            self.phase = CallPhase::ShuttingDown;
            return;
        };
        if !self.state.calls.register(&sid) {
            warn!(stream_sid = %sid, "stream id already has an active call, rejecting");
            self.phase = CallPhase::ShuttingDown;
            return;
        }
        self.registered = true;
        self.stream_sid = Some(sid.clone());
        self.state.sessions.get_or_create(&sid);
        emit(
            &self.state,
            &sid,
            LatencyMark::CallStart,
            json!({ "call_sid": start.call_sid, "encoding": start.media_format.encoding }),
        );
        info!(stream_sid = %sid, call_sid = ?start.call_sid, "call started");

        self.segmenter = AudioSegmenter::new(self.state.config.segmenter.clone());
        self.phase = CallPhase::Active;

        if !self.greeted {
            self.greeted = true;
            let text = greeting::current_greeting(&self.state.config.call.practice_name);
            self.state
                .sessions
                .append_turn(&sid, ChatTurn::assistant(text.clone()));
            emit(&self.state, &sid, LatencyMark::GreetingStart, json!({}));
            self.spawn_turn(TurnKind::Greeting, Some(text));
        }

        let mut transcriber =
            StreamingTranscriber::new(self.state.config.stt.clone(), self.transcript_tx.clone());
        match transcriber.start().await {
            Ok(()) => {
                emit(&self.state, &sid, LatencyMark::SttConnected, json!({}));
                self.transcriber = Some(transcriber);
            }
            Err(e) => {
                warn!(stream_sid = %sid, "speech recognition unavailable: {}", e);
                self.fail_call("stt_connect");
            }
        }
    }

    fn on_media(&mut self, payload: &str) {
        if self.phase != CallPhase::Active {
            return;
        }
        let audio = match base64::engine::general_purpose::STANDARD.decode(payload) {
            Ok(audio) => audio,
            Err(e) => {
                debug!(stream_sid = ?self.stream_sid, "dropping undecodable media payload: {}", e);
                return;
            }
        };

        if let Some(block) = self.segmenter.process_chunk(&audio) {
            if let Some(sid) = &self.stream_sid {
                emit(
                    &self.state,
                    sid,
                    LatencyMark::UtteranceBlock,
                    json!({
                        "bytes": block.audio.len(),
                        "duration_ms": block.duration.as_millis() as u64,
                        "reason": format!("{:?}", block.reason),
                    }),
                );
            }
        }
        if let Some(transcriber) = &self.transcriber {
            transcriber.send_audio(audio);
        }
    }

    fn on_transcriber_event(&mut self, event: TranscriberEvent) {
        match event {
            TranscriberEvent::Transcript(transcript) => self.on_transcript(transcript),
            TranscriberEvent::Closed { error: Some(e) } => {
                if self.phase == CallPhase::Active {
                    warn!(stream_sid = ?self.stream_sid, "speech recognition stream failed: {}", e);
                    self.transcriber = None;
                    self.fail_call("stt_stream");
                }
            }
            TranscriberEvent::Closed { error: None } => {
                debug!(stream_sid = ?self.stream_sid, "speech recognition stream closed");
            }
        }
    }

    fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if self.phase != CallPhase::Active {
            return;
        }
        let text = transcript.text.trim();
        if text.is_empty() {
            return;
        }

        // A transcript the debounce would drop must not silence the reply it
        // duplicates.
        if self.state.config.call.barge_in && !self.within_debounce(Instant::now()) {
            if let Some(turn) = &self.turn {
                if turn.kind != TurnKind::Farewell {
                    self.cancel_turn("barge_in");
                }
            }
        }

        if transcript.is_final {
            self.pending_partial = None;
            self.on_final(text.to_string(), "final");
        } else if let Some(idle) = self.state.config.call.partial_idle() {
            self.pending_partial = Some((text.to_string(), Instant::now() + idle));
        }
    }

    fn promote_partial(&mut self) {
        if let Some((text, _)) = self.pending_partial.take() {
            debug!(stream_sid = ?self.stream_sid, "promoting idle partial transcript");
            self.on_final(text, "partial_idle");
        }
    }

    fn on_final(&mut self, text: String, source: &'static str) {
        let Some(sid) = self.stream_sid.clone() else {
            return;
        };
        let now = Instant::now();
        emit(&self.state, &sid, LatencyMark::SttFinal, json!({ "text": text, "source": source }));

        if self.within_debounce(now) {
            debug!(stream_sid = %sid, "final within debounce window, dropping");
            return;
        }
        if self.farewell_pending || self.farewell_started {
            return;
        }
        if let Some(turn) = &self.turn {
            info!(stream_sid = %sid, turn = turn.kind.as_str(), "turn in progress, dropping final");
            return;
        }

        self.last_accepted_final = Some(now);
        self.state.sessions.append_turn(&sid, ChatTurn::user(text));
        self.spawn_turn(TurnKind::Reply, None);
    }

    fn within_debounce(&self, now: Instant) -> bool {
        self.last_accepted_final
            .is_some_and(|last| now.duration_since(last) < self.state.config.call.debounce())
    }

    /// Starts a turn task. `text` is spoken as-is; `None` asks the reply
    /// generator first.
    fn spawn_turn(&mut self, kind: TurnKind, text: Option<String>) {
        let Some(sid) = self.stream_sid.clone() else {
            return;
        };
        self.next_turn_id += 1;
        let id = self.next_turn_id;
        let state = self.state.clone();
        let outbound = self.outbound.clone();
        let done = self.turn_tx.clone();

        let handle = tokio::spawn(async move {
            let text = match text {
                Some(text) => text,
                None => compose_reply(&state, &sid).await,
            };
            let delivered = speak(&state, &sid, outbound, &text).await;
            let _ = done.send(TurnOutcome { id, delivered }).await;
        });
        debug!(stream_sid = ?self.stream_sid, turn = kind.as_str(), id, "turn started");
        self.turn = Some(ActiveTurn { id, kind, handle });
    }

    fn on_turn_done(&mut self, outcome: TurnOutcome) {
        let Some(turn) = &self.turn else {
            return;
        };
        if turn.id != outcome.id {
            // Finished just before it was cancelled.
            return;
        }
        let kind = turn.kind;
        self.turn = None;
        debug!(
            stream_sid = ?self.stream_sid,
            turn = kind.as_str(),
            delivered = outcome.delivered,
            "turn finished"
        );

        if kind == TurnKind::Farewell {
            info!(stream_sid = ?self.stream_sid, "farewell played, hanging up");
            self.phase = CallPhase::ShuttingDown;
        } else if self.farewell_pending {
            self.farewell_pending = false;
            self.start_farewell();
        }
    }

    /// Speech recognition is gone: apologise, then hang up once it has played.
    fn fail_call(&mut self, reason: &'static str) {
        if self.farewell_pending || self.farewell_started {
            return;
        }
        if let Some(mut transcriber) = self.transcriber.take() {
            transcriber.close();
        }
        info!(stream_sid = ?self.stream_sid, reason, "speech recognition lost, ending call");
        if self.turn.is_some() {
            self.farewell_pending = true;
        } else {
            self.start_farewell();
        }
    }

    fn start_farewell(&mut self) {
        self.farewell_started = true;
        self.pending_partial = None;
        self.spawn_turn(TurnKind::Farewell, Some(greeting::TRANSCRIPTION_FAILURE.to_string()));
    }

    /// Aborts the in-flight turn and asks the transport to drop audio it
    /// has buffered. Best effort: a full or closed outbound queue is ignored.
    fn cancel_turn(&mut self, reason: &'static str) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        turn.handle.abort();
        let Some(sid) = &self.stream_sid else {
            return;
        };
        for event in [
            OutboundEvent::clear(sid),
            OutboundEvent::mark(sid, Marker::Cancelled.as_str()),
        ] {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if let Err(e) = self.outbound.try_send(text) {
                        debug!(stream_sid = %sid, "cancel message not queued: {}", e);
                    }
                }
                Err(e) => debug!(stream_sid = %sid, "cancel message not encoded: {}", e),
            }
        }
        emit(
            &self.state,
            sid,
            LatencyMark::TurnCancelled,
            json!({ "reason": reason, "turn": turn.kind.as_str() }),
        );
        info!(stream_sid = %sid, turn = turn.kind.as_str(), reason, "turn cancelled");
    }

    /// Tears the call down. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.phase == CallPhase::Closed {
            return;
        }
        self.phase = CallPhase::ShuttingDown;
        self.cancel_turn("call_end");
        self.pending_partial = None;
        if let Some(mut transcriber) = self.transcriber.take() {
            transcriber.close();
        }

        if let Some(sid) = self.stream_sid.clone() {
            emit(&self.state, &sid, LatencyMark::CallEnd, json!({}));
            if self.registered {
                self.state.calls.unregister(&sid);
                self.registered = false;
            }
            if self.state.config.call.evict_on_close {
                self.state.sessions.remove(&sid);
            }
            info!(stream_sid = %sid, "call ended");
        }
        self.phase = CallPhase::Closed;
    }
}

impl Drop for CallSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
