use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use carecall_voice::error::{SinkError, StreamError};
use carecall_voice::tts::{AudioStream, RecordingSink, TtsTransport};
use carecall_voice::{AudioFrame, FrameSink, Marker, PacingConfig, StreamingSynthesizer, SynthesisError, TtsConfig};
use futures_util::{stream, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;

struct Canned(Vec<Result<Vec<u8>, StreamError>>);

impl Canned {
    fn audio(chunks: Vec<Vec<u8>>) -> Self {
        Self(chunks.into_iter().map(Ok).collect())
    }
}

#[async_trait]
impl TtsTransport for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn open(&self, _text: &str) -> Result<AudioStream, SynthesisError> {
        let items: Vec<Result<Vec<u8>, SynthesisError>> = self
            .0
            .iter()
            .cloned()
            .map(|item| item.map_err(SynthesisError::from))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

/// Records every send with the (virtual) time it happened.
#[derive(Default)]
struct TimedSink {
    started: Option<Instant>,
    sends: Vec<(Duration, usize)>,
    markers: Vec<(Duration, Marker)>,
}

impl TimedSink {
    fn now(&mut self) -> Duration {
        let started = *self.started.get_or_insert_with(Instant::now);
        started.elapsed()
    }
}

#[async_trait]
impl FrameSink for TimedSink {
    async fn send_frames(&mut self, frames: &[AudioFrame]) -> Result<(), SinkError> {
        let at = self.now();
        assert!(frames.iter().all(|f| f.len() == 160));
        self.sends.push((at, frames.len()));
        Ok(())
    }

    async fn send_marker(&mut self, marker: Marker) -> Result<(), SinkError> {
        let at = self.now();
        self.markers.push((at, marker));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn one_second_reply_is_paced_into_ten_groups() {
    let synth = StreamingSynthesizer::new(
        Box::new(Canned::audio(vec![vec![0x55; 8000]])),
        PacingConfig::default(),
    );
    let mut sink = TimedSink::default();
    let done = synth
        .synthesize_and_stream("Your appointment is confirmed.", &mut sink)
        .await
        .unwrap();

    assert_eq!(done.frames, 50);
    assert_eq!(done.groups, 10);
    assert_eq!(sink.sends.len(), 10);
    assert!(sink.sends.iter().all(|(_, n)| *n == 5));

    // Delivered audio never leads wall time by more than max-ahead plus one group.
    let mut delivered = Duration::ZERO;
    for (at, frames) in &sink.sends {
        delivered += Duration::from_millis(20 * *frames as u64);
        let lead = delivered.saturating_sub(*at);
        assert!(lead <= Duration::from_millis(300), "lead {:?} at {:?}", lead, at);
    }

    assert_eq!(sink.markers.len(), 1);
    let (end_at, marker) = sink.markers[0];
    assert_eq!(marker, Marker::End);
    assert!(end_at >= Duration::from_millis(800), "end at {:?}", end_at);
    assert!(end_at <= Duration::from_millis(1200), "end at {:?}", end_at);
}

#[tokio::test(start_paused = true)]
async fn empty_audio_yields_error_marker_and_no_frames() {
    let synth = StreamingSynthesizer::new(Box::new(Canned::audio(vec![])), PacingConfig::default());
    let mut sink = RecordingSink::default();
    let err = synth
        .synthesize_and_stream("Hello there", &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, SynthesisError::EmptyAudio));
    assert_eq!(sink.frame_count(), 0);
    assert_eq!(sink.markers, vec![Marker::Error]);
}

#[tokio::test(start_paused = true)]
async fn mid_stream_failure_keeps_sent_audio_and_marks_error() {
    let synth = StreamingSynthesizer::new(
        Box::new(Canned(vec![
            Ok(vec![0x10; 1600]),
            Err(StreamError::Transport("reset".into())),
        ])),
        PacingConfig::default(),
    );
    let mut sink = RecordingSink::default();
    let err = synth
        .synthesize_and_stream("Hello there", &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, SynthesisError::Stream(_)));
    assert_eq!(sink.frame_count(), 10);
    assert_eq!(sink.markers, vec![Marker::Error]);
}

struct ClosedSink;

#[async_trait]
impl FrameSink for ClosedSink {
    async fn send_frames(&mut self, _frames: &[AudioFrame]) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }

    async fn send_marker(&mut self, _marker: Marker) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

#[tokio::test(start_paused = true)]
async fn closed_sink_aborts_delivery() {
    let synth = StreamingSynthesizer::new(
        Box::new(Canned::audio(vec![vec![0x10; 1600]])),
        PacingConfig::default(),
    );
    let err = synth
        .synthesize_and_stream("Hello there", &mut ClosedSink)
        .await
        .unwrap_err();
    assert!(matches!(err, SynthesisError::Sink(SinkError::Closed)));
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config_against(http_base: &str) -> TtsConfig {
    TtsConfig {
        // Nothing listens on port 1, so the streaming transport cannot connect.
        streaming_url: "ws://127.0.0.1:1/v1/text-to-speech".to_string(),
        http_url: format!("{}/v1/text-to-speech", http_base),
        api_key: "test-key".to_string(),
        voice_id: "voice-1".to_string(),
        connect_timeout_ms: 2_000,
        ..TtsConfig::default()
    }
}

#[tokio::test]
async fn falls_back_to_http_when_streaming_cannot_connect() {
    let router = Router::new().route(
        "/v1/text-to-speech/{voice}",
        post(|| async { vec![0x7Eu8; 800] }),
    );
    let base = serve(router).await;

    let synth = StreamingSynthesizer::from_config(&config_against(&base)).unwrap();
    let mut sink = RecordingSink::default();
    let done = synth
        .synthesize_and_stream("See you Tuesday.", &mut sink)
        .await
        .unwrap();

    assert_eq!(done.frames, 5);
    assert_eq!(sink.markers, vec![Marker::End]);
    assert!(sink.sends[0][0].as_bytes().iter().all(|&b| b == 0x7E));
}

#[tokio::test]
async fn provider_http_error_is_reported() {
    let router = Router::new().route(
        "/v1/text-to-speech/{voice}",
        post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
    );
    let base = serve(router).await;

    let synth = StreamingSynthesizer::from_config(&config_against(&base)).unwrap();
    let mut sink = RecordingSink::default();
    let err = synth
        .synthesize_and_stream("See you Tuesday.", &mut sink)
        .await
        .unwrap_err();

    match err {
        SynthesisError::Provider { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(sink.markers, vec![Marker::Error]);
}

#[tokio::test]
async fn http_reply_longer_than_the_request_timeout_plays_out() {
    // Two seconds of audio against a one second request deadline.
    let router = Router::new().route(
        "/v1/text-to-speech/{voice}",
        post(|| async { vec![0x7Eu8; 16_000] }),
    );
    let base = serve(router).await;
    let config = TtsConfig {
        streaming_enabled: false,
        request_timeout_ms: 1_000,
        ..config_against(&base)
    };

    let synth = StreamingSynthesizer::from_config(&config).unwrap();
    let mut sink = RecordingSink::default();
    let done = synth
        .synthesize_and_stream("Your appointment is confirmed for Tuesday at nine.", &mut sink)
        .await
        .unwrap();

    assert_eq!(done.frames, 100);
    assert_eq!(sink.frame_count(), 100);
    assert_eq!(sink.markers, vec![Marker::End]);
    assert!(done.audio >= Duration::from_secs(2));
}
