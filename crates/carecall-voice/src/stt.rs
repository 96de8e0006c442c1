//! Streaming speech-to-text over a live provider WebSocket.
//!
//! A [`StreamingTranscriber`] owns one provider session. Audio is queued to a
//! writer task in send order; a reader task parses provider results and
//! forwards them as [`TranscriberEvent`]s over the channel supplied at
//! construction. Failures never propagate as panics: a broken session simply
//! ends with a `Closed` event carrying the [`StreamError`].

use crate::config::SttConfig;
use crate::error::{ConnectError, StreamError};
use carecall_types::TranscriptEvent;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Audio chunks buffered toward the provider before new ones are dropped.
/// 256 media chunks is about five seconds of telephony audio.
const AUDIO_QUEUE_CAPACITY: usize = 256;

/// Lifecycle of a transcriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriberState {
    Idle,
    Connecting,
    Streaming,
    Closed,
}

/// Events delivered to the owner of a transcriber.
#[derive(Debug, Clone)]
pub enum TranscriberEvent {
    Transcript(TranscriptEvent),
    /// The session ended. `error` is `None` after an explicit [`StreamingTranscriber::close`].
    Closed { error: Option<StreamError> },
}

enum Command {
    Audio(Vec<u8>),
    Close,
}

/// Provider messages. Only `Results` drive the pipeline; the rest are logged.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ProviderMessage {
    Results {
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
        channel: ResultChannel,
    },
    Error {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Parses a provider text frame into a transcript, if it carries one.
///
/// Only the top-ranked alternative is used and blank transcripts are skipped.
fn parse_result(text: &str) -> Result<Option<TranscriptEvent>, StreamError> {
    let message: ProviderMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable STT message: {}", e);
            return Ok(None);
        }
    };
    match message {
        ProviderMessage::Results {
            is_final,
            speech_final,
            channel,
        } => {
            let Some(top) = channel.alternatives.into_iter().next() else {
                return Ok(None);
            };
            let transcript = top.transcript.trim();
            if transcript.is_empty() {
                return Ok(None);
            }
            let event = if is_final || speech_final {
                TranscriptEvent::final_result(transcript)
            } else {
                TranscriptEvent::partial(transcript)
            };
            Ok(Some(event))
        }
        ProviderMessage::Error {
            description,
            message,
        } => Err(StreamError::Provider(
            description
                .or(message)
                .unwrap_or_else(|| "unspecified provider error".to_string()),
        )),
        ProviderMessage::Other => Ok(None),
    }
}

/// One live transcription session.
pub struct StreamingTranscriber {
    config: SttConfig,
    events: mpsc::Sender<TranscriberEvent>,
    state: Arc<watch::Sender<TranscriberState>>,
    commands: Option<mpsc::Sender<Command>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl StreamingTranscriber {
    pub fn new(config: SttConfig, events: mpsc::Sender<TranscriberEvent>) -> Self {
        let (state, _) = watch::channel(TranscriberState::Idle);
        Self {
            config,
            events,
            state: Arc::new(state),
            commands: None,
            reader: None,
            writer: None,
        }
    }

    pub fn state(&self) -> TranscriberState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TranscriberState> {
        self.state.subscribe()
    }

    /// Builds the provider URL from the session configuration.
    pub fn session_url(&self) -> Result<url::Url, ConnectError> {
        let mut url = url::Url::parse(&self.config.url)
            .map_err(|e| ConnectError::InvalidEndpoint(format!("{}: {}", self.config.url, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model", &self.config.model)
                .append_pair("language", &self.config.language)
                .append_pair("encoding", &self.config.encoding)
                .append_pair("sample_rate", &self.config.sample_rate.to_string())
                .append_pair("channels", "1")
                .append_pair("interim_results", &self.config.interim_results.to_string())
                .append_pair("punctuate", &self.config.punctuate.to_string());
            if let Some(endpointing) = self.config.endpointing_ms {
                query.append_pair("endpointing", &endpointing.to_string());
            }
        }
        Ok(url)
    }

    /// Opens the provider session.
    ///
    /// Fails fast after the configured connect timeout. A failed start leaves
    /// the transcriber `Closed`; callers must treat that as fatal for the call.
    pub async fn start(&mut self) -> Result<(), ConnectError> {
        if self.state() != TranscriberState::Idle {
            return Err(ConnectError::AlreadyStarted);
        }
        self.state.send_replace(TranscriberState::Connecting);

        match self.connect().await {
            Ok(()) => {
                self.state.send_replace(TranscriberState::Streaming);
                info!(model = %self.config.model, "STT session streaming");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(TranscriberState::Closed);
                warn!("STT connect failed: {}", e);
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        let url = self.session_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::InvalidEndpoint(e.to_string()))?;
        if !self.config.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
                .map_err(|e| ConnectError::InvalidEndpoint(format!("invalid API key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let timeout = self.config.connect_timeout();
        let (socket, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ConnectError::Timeout(timeout))?
                .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(AUDIO_QUEUE_CAPACITY);
        let keepalive_every = Duration::from_secs(self.config.keepalive_secs);

        let writer = tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(if keepalive_every.is_zero() {
                Duration::from_secs(3600)
            } else {
                keepalive_every
            });
            keepalive.tick().await;
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Audio(chunk)) => {
                            if let Err(e) = ws_tx.send(Message::Binary(chunk.into())).await {
                                warn!("STT audio send failed: {}", e);
                                break;
                            }
                        }
                        Some(Command::Close) | None => {
                            let close = r#"{"type":"CloseStream"}"#.to_string();
                            if let Err(e) = ws_tx.send(Message::Text(close.into())).await {
                                debug!("STT close-stream send failed: {}", e);
                            }
                            break;
                        }
                    },
                    _ = keepalive.tick(), if !keepalive_every.is_zero() => {
                        let ping = r#"{"type":"KeepAlive"}"#.to_string();
                        if let Err(e) = ws_tx.send(Message::Text(ping.into())).await {
                            warn!("STT keep-alive send failed: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        let events = self.events.clone();
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            let mut failure = None;
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match parse_result(text.as_str()) {
                        Ok(Some(event)) => {
                            debug!(is_final = event.is_final, text = %event.text, "STT result");
                            if events.send(TranscriberEvent::Transcript(event)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "no close frame".to_string());
                        failure = Some(StreamError::ProviderClosed(reason));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failure = Some(StreamError::Transport(e.to_string()));
                        break;
                    }
                }
            }
            if failure.is_none() && *state.borrow() != TranscriberState::Closed {
                failure = Some(StreamError::ProviderClosed("stream ended".to_string()));
            }

            // After an explicit close the provider's goodbye is expected, not an error.
            let requested = *state.borrow() == TranscriberState::Closed;
            state.send_replace(TranscriberState::Closed);
            let error = if requested { None } else { failure };
            if let Some(e) = &error {
                warn!("STT session ended: {}", e);
            }
            let _ = events.send(TranscriberEvent::Closed { error }).await;
        });

        self.commands = Some(cmd_tx);
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    /// Queues an audio chunk for the provider. Best effort: chunks are dropped
    /// when the session is not streaming or the queue is full.
    pub fn send_audio(&self, chunk: Vec<u8>) {
        if self.state() != TranscriberState::Streaming {
            return;
        }
        if let Some(commands) = &self.commands {
            if let Err(e) = commands.try_send(Command::Audio(chunk)) {
                debug!("dropping STT audio chunk: {}", e);
            }
        }
    }

    /// Ends the session. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        let previous = self.state.send_replace(TranscriberState::Closed);
        if let Some(commands) = self.commands.take() {
            if previous == TranscriberState::Streaming {
                let _ = commands.try_send(Command::Close);
            }
        }
    }
}

impl Drop for StreamingTranscriber {
    fn drop(&mut self) {
        self.close();
        // The writer exits on its own once the close command is flushed;
        // the reader would otherwise wait on the provider indefinitely.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_result_top_alternative() {
        let raw = r#"{"type":"Results","is_final":true,"speech_final":true,
            "channel":{"alternatives":[{"transcript":" I need an appointment ","confidence":0.98},
                                       {"transcript":"I need a point meant","confidence":0.4}]}}"#;
        let event = parse_result(raw).unwrap().unwrap();
        assert!(event.is_final);
        assert_eq!(event.text, "I need an appointment");
    }

    #[test]
    fn parses_partial_and_skips_blank_results() {
        let partial = r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"I need"}]}}"#;
        let event = parse_result(partial).unwrap().unwrap();
        assert!(!event.is_final);

        let blank = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":""}]}}"#;
        assert!(parse_result(blank).unwrap().is_none());

        let none = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[]}}"#;
        assert!(parse_result(none).unwrap().is_none());
    }

    #[test]
    fn metadata_is_ignored_and_errors_surface() {
        assert!(parse_result(r#"{"type":"Metadata","request_id":"x"}"#)
            .unwrap()
            .is_none());
        assert!(parse_result("not json").unwrap().is_none());
        let err = parse_result(r#"{"type":"Error","description":"bad audio"}"#).unwrap_err();
        assert!(err.to_string().contains("bad audio"));
    }

    #[test]
    fn session_url_carries_stream_configuration() {
        let (tx, _rx) = mpsc::channel(1);
        let stt = StreamingTranscriber::new(
            SttConfig {
                endpointing_ms: Some(300),
                ..SttConfig::default()
            },
            tx,
        );
        let url = stt.session_url().unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("encoding=mulaw"));
        assert!(query.contains("sample_rate=8000"));
        assert!(query.contains("interim_results=true"));
        assert!(query.contains("language=en-US"));
        assert!(query.contains("endpointing=300"));
    }

    #[tokio::test]
    async fn close_is_idempotent_before_start() {
        let (tx, _rx) = mpsc::channel(1);
        let mut stt = StreamingTranscriber::new(SttConfig::default(), tx);
        assert_eq!(stt.state(), TranscriberState::Idle);
        stt.close();
        stt.close();
        assert_eq!(stt.state(), TranscriberState::Closed);
        stt.send_audio(vec![0xFF; 160]);
        assert!(matches!(stt.start().await, Err(ConnectError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn unreachable_provider_fails_with_connect_error() {
        let (tx, _rx) = mpsc::channel(1);
        let mut stt = StreamingTranscriber::new(
            SttConfig {
                url: "ws://127.0.0.1:1/v1/listen".to_string(),
                connect_timeout_ms: 2_000,
                ..SttConfig::default()
            },
            tx,
        );
        let err = stt.start().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Handshake(_) | ConnectError::Timeout(_)
        ));
        assert_eq!(stt.state(), TranscriberState::Closed);
    }
}
