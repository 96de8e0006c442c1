//! Fakes shared by the server integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use carecall_server::config::Config;
use carecall_server::reply::{ReplyError, ReplyGenerator};
use carecall_server::{app, AppState};
use carecall_types::ChatTurn;
use carecall_voice::tts::{AudioStream, TtsTransport};
use carecall_voice::{PacingConfig, StreamingSynthesizer, SynthesisError};
use futures_util::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reply generator returning a fixed answer (or failing) and counting calls.
pub struct MockReply {
    pub answer: Option<String>,
    pub calls: AtomicUsize,
    pub histories: Mutex<Vec<Vec<ChatTurn>>>,
}

impl MockReply {
    pub fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(text.to_string()),
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyGenerator for MockReply {
    async fn generate_reply(&self, _session_id: &str, history: &[ChatTurn]) -> Result<String, ReplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.to_vec());
        self.answer
            .clone()
            .ok_or_else(|| ReplyError::Status {
                status: 503,
                body: "overloaded".to_string(),
            })
    }
}

/// TTS transport producing `bytes` of silence for any text.
pub struct SilenceTts {
    pub bytes: usize,
}

#[async_trait]
impl TtsTransport for SilenceTts {
    fn name(&self) -> &'static str {
        "silence"
    }

    async fn open(&self, _text: &str) -> Result<AudioStream, SynthesisError> {
        let chunk: Result<Vec<u8>, SynthesisError> = Ok(vec![0xFF; self.bytes]);
        Ok(stream::iter(vec![chunk]).boxed())
    }
}

/// A live-transcription provider that forwards whatever the test pushes.
pub struct FakeStt {
    pub url: String,
    /// `None` drops the connection without a close handshake.
    push: mpsc::UnboundedSender<Option<Value>>,
    pub audio_chunks: Arc<AtomicUsize>,
}

impl FakeStt {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push, mut pushed) = mpsc::unbounded_channel::<Option<Value>>();
        let audio_chunks = Arc::new(AtomicUsize::new(0));
        let counter = audio_chunks.clone();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            loop {
                tokio::select! {
                    incoming = ws.next() => match incoming {
                        Some(Ok(Message::Binary(_))) => {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }
                        Some(Ok(Message::Text(text))) if text.as_str().contains("CloseStream") => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    Some(pushed) = pushed.recv() => {
                        let Some(body) = pushed else {
                            break;
                        };
                        if ws.send(Message::Text(body.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            url: format!("ws://{}/v1/listen", addr),
            push,
            audio_chunks,
        }
    }

    pub fn say(&self, transcript: &str, is_final: bool) {
        let _ = self.push.send(Some(json!({
            "type": "Results",
            "is_final": is_final,
            "speech_final": is_final,
            "channel": { "alternatives": [{ "transcript": transcript, "confidence": 0.92 }] }
        })));
    }

    /// Drops the provider connection mid-call.
    pub fn hang_up(&self) {
        let _ = self.push.send(None);
    }
}

/// Config with a reachable (or deliberately unreachable) STT endpoint and
/// sessions kept after hang-up so tests can inspect them.
pub fn test_config(stt_url: &str) -> Config {
    let mut config = Config::default();
    config.stt.url = stt_url.to_string();
    config.stt.api_key = "test-key".to_string();
    config.stt.connect_timeout_ms = 2_000;
    config.call.evict_on_close = false;
    config.call.hangup_grace_ms = 20;
    config.call.practice_name = "Lakeside Family Practice".to_string();
    config
}

/// 1600 bytes of μ-law: ten 20 ms frames.
pub fn test_state(config: Config, reply: Arc<MockReply>) -> AppState {
    test_state_with_audio(config, reply, 1_600)
}

pub fn test_state_with_audio(config: Config, reply: Arc<MockReply>, bytes: usize) -> AppState {
    let synthesizer = StreamingSynthesizer::new(Box::new(SilenceTts { bytes }), PacingConfig::default());
    AppState::new(config, reply, synthesizer)
}

pub async fn spawn_app(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

pub async fn connect_media(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/media", addr))
        .await
        .unwrap();
    ws
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn start_call(ws: &mut Client, stream_sid: &str) {
    send_json(ws, json!({ "event": "connected", "protocol": "Call", "version": "1.0.0" })).await;
    send_json(
        ws,
        json!({
            "event": "start",
            "streamSid": stream_sid,
            "start": {
                "streamSid": stream_sid,
                "callSid": "CA-test",
                "tracks": ["inbound"],
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        }),
    )
    .await;
}

/// Next JSON message from the server, `None` once the socket closes.
pub async fn next_json(ws: &mut Client) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for the server");
        match message {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Reads until a mark named `name`, returning the number of media frames seen.
pub async fn read_until_mark(ws: &mut Client, name: &str) -> usize {
    let mut frames = 0;
    loop {
        let message = next_json(ws)
            .await
            .unwrap_or_else(|| panic!("socket closed before mark '{}'", name));
        match message["event"].as_str() {
            Some("media") => frames += 1,
            Some("mark") if message["mark"]["name"] == name => return frames,
            _ => {}
        }
    }
}

/// Polls until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
