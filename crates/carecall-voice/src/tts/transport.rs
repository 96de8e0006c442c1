//! Provider transports that turn reply text into a stream of audio bytes.

use super::breaker::CircuitBreaker;
use crate::config::TtsConfig;
use crate::error::{ConnectError, StreamError, SynthesisError};
use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

/// Audio bytes in provider order. Chunk boundaries carry no meaning.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, SynthesisError>>;

/// A way of obtaining synthesized audio for a piece of text.
#[async_trait]
pub trait TtsTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts synthesis. Errors returned here, as opposed to errors yielded
    /// by the stream, mean no audio was produced at all.
    async fn open(&self, text: &str) -> Result<AudioStream, SynthesisError>;
}

fn voice_settings(config: &TtsConfig) -> serde_json::Value {
    json!({
        "stability": config.stability,
        "similarity_boost": config.similarity_boost,
        "speed": config.speed,
    })
}

/// Incremental synthesis over the provider's text-input WebSocket.
pub struct WebSocketTransport {
    config: TtsConfig,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WebSocketTransport {
    pub fn new(config: TtsConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> Result<url::Url, ConnectError> {
        let base = self.config.streaming_url.trim_end_matches('/');
        let raw = format!("{}/{}/stream-input", base, self.config.voice_id);
        let mut url =
            url::Url::parse(&raw).map_err(|e| ConnectError::InvalidEndpoint(format!("{}: {}", raw, e)))?;
        url.query_pairs_mut()
            .append_pair("model_id", &self.config.model_id)
            .append_pair("output_format", &self.config.output_format);
        Ok(url)
    }
}

fn decode_chunk(text: &str) -> Result<(Option<Vec<u8>>, bool), SynthesisError> {
    let chunk: StreamChunk = serde_json::from_str(text)
        .map_err(|e| StreamError::Provider(format!("unparseable TTS message: {}", e)))?;
    if let Some(error) = chunk.error {
        let detail = chunk.message.map(|m| format!("{}: {}", error, m)).unwrap_or(error);
        return Err(StreamError::Provider(detail).into());
    }
    let audio = match chunk.audio.as_deref() {
        Some(b64) if !b64.is_empty() => Some(
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| StreamError::Provider(format!("invalid audio payload: {}", e)))?,
        ),
        _ => None,
    };
    Ok((audio, chunk.is_final.unwrap_or(false)))
}

#[async_trait]
impl TtsTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn open(&self, text: &str) -> Result<AudioStream, SynthesisError> {
        let url = self.endpoint()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::InvalidEndpoint(e.to_string()))?;
        if !self.config.api_key.is_empty() {
            let value = HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| ConnectError::InvalidEndpoint(format!("invalid API key: {}", e)))?;
            request.headers_mut().insert("xi-api-key", value);
        }

        let timeout = self.config.connect_timeout();
        let (mut socket, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ConnectError::Timeout(timeout))?
                .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        // Begin-of-stream carries settings, then the whole text with a flush,
        // then an empty text to end the stream.
        let messages = [
            json!({ "text": " ", "voice_settings": voice_settings(&self.config) }),
            json!({ "text": format!("{} ", text), "flush": true }),
            json!({ "text": "" }),
        ];
        for message in messages {
            socket
                .send(Message::Text(message.to_string().into()))
                .await
                .map_err(|e| ConnectError::Handshake(format!("sending text failed: {}", e)))?;
        }

        let audio = stream::unfold(Some(socket), |state| async move {
            let Some(mut socket) = state else {
                return None;
            };
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => match decode_chunk(text.as_str()) {
                        Ok((Some(bytes), _)) => return Some((Ok(bytes), Some(socket))),
                        Ok((None, true)) => {
                            let _ = socket.close(None).await;
                            return None;
                        }
                        Ok((None, false)) => continue,
                        Err(e) => return Some((Err(e), None)),
                    },
                    Some(Ok(Message::Binary(bytes))) => {
                        return Some((Ok(bytes.to_vec()), Some(socket)))
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let error = SynthesisError::from(StreamError::Transport(e.to_string()));
                        return Some((Err(error), None));
                    }
                }
            }
        });
        Ok(audio.boxed())
    }
}

/// Synthesis over the provider's HTTP endpoint, read as a byte stream.
pub struct HttpTransport {
    config: TtsConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: TtsConfig) -> Result<Self, SynthesisError> {
        // No total timeout: the body is read at playback pace and may run
        // longer than the request deadline, which only covers the headers.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SynthesisError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}?output_format={}",
            self.config.http_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.output_format
        )
    }
}

#[async_trait]
impl TtsTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, text: &str) -> Result<AudioStream, SynthesisError> {
        let body = json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": voice_settings(&self.config),
        });
        let deadline = self.config.request_timeout();
        let request = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send();
        let response = tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| SynthesisError::Connect(ConnectError::Timeout(deadline)))?
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Connect(ConnectError::Timeout(self.config.connect_timeout()))
                } else if e.is_connect() {
                    SynthesisError::Connect(ConnectError::Handshake(e.to_string()))
                } else {
                    SynthesisError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(deadline, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            return Err(SynthesisError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let audio = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| SynthesisError::from(StreamError::Transport(e.to_string())))
        });
        Ok(audio.boxed())
    }
}

/// Tries a primary transport and falls back when it cannot connect.
///
/// Only connect failures fall back: once the primary has produced a stream,
/// its errors are the caller's. A circuit breaker skips the primary after
/// repeated connect failures.
pub struct FallbackTransport {
    primary: Box<dyn TtsTransport>,
    fallback: Box<dyn TtsTransport>,
    breaker: CircuitBreaker,
}

impl FallbackTransport {
    pub fn new(
        primary: Box<dyn TtsTransport>,
        fallback: Box<dyn TtsTransport>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }
}

#[async_trait]
impl TtsTransport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn open(&self, text: &str) -> Result<AudioStream, SynthesisError> {
        if self.breaker.is_available() {
            match self.primary.open(text).await {
                Ok(stream) => {
                    self.breaker.record_success();
                    return Ok(stream);
                }
                Err(e) if e.is_connect() => {
                    self.breaker.record_failure();
                    warn!(
                        primary = self.primary.name(),
                        fallback = self.fallback.name(),
                        "TTS primary transport failed, falling back: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(primary = self.primary.name(), "TTS primary transport tripped, skipping");
        }
        self.fallback.open(text).await
    }
}

/// Builds the transport chain described by `config`.
pub fn build_transport(config: &TtsConfig) -> Result<Box<dyn TtsTransport>, SynthesisError> {
    let http = Box::new(HttpTransport::new(config.clone())?);
    if !config.streaming_enabled {
        return Ok(http);
    }
    Ok(Box::new(FallbackTransport::new(
        Box::new(WebSocketTransport::new(config.clone())),
        http,
        CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown()),
    )))
}
