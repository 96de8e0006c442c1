//! CareCall server library logic.

pub mod api;
pub mod api_chat;
pub mod api_media;
pub mod api_sessions;
pub mod api_voice;
pub mod call;
pub mod config;
pub mod greeting;
pub mod reply;

use api_media::CallRegistry;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use carecall_state::SessionStore;
use carecall_voice::{StreamingSynthesizer, SynthesisError};
use config::Config;
use reply::{ChatCompletionsGenerator, ReplyError, ReplyGenerator};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers and calls.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Per-session conversation state, shared by calls and chat.
    pub sessions: Arc<SessionStore>,
    /// Stream ids of calls in progress.
    pub calls: CallRegistry,
    pub reply: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<StreamingSynthesizer>,
}

/// Failures building [`AppState`] from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("speech synthesis setup failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("reply generator setup failed: {0}")]
    Reply(#[from] ReplyError),
}

impl AppState {
    /// Assembles state from explicit components.
    pub fn new(
        config: Config,
        reply: Arc<dyn ReplyGenerator>,
        synthesizer: StreamingSynthesizer,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new()),
            calls: CallRegistry::new(),
            reply,
            synthesizer: Arc::new(synthesizer),
        }
    }

    /// Builds the production providers described by `config`.
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let synthesizer = StreamingSynthesizer::from_config(&config.tts)?;
        let reply = ChatCompletionsGenerator::new(config.reply.clone())?;
        Ok(Self::new(config, Arc::new(reply), synthesizer))
    }
}

/// Maximum request body size (256 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.calls.len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/voice", post(api_voice::voice_webhook_handler))
        .route("/media", get(api_media::media_ws_handler))
        .route("/api/chat", post(api_chat::chat_handler))
        .route(
            "/api/sessions/{sessionId}",
            get(api_sessions::get_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}/events",
            post(api_sessions::record_events_handler),
        )
        .route(
            "/api/sessions/{sessionId}/current-event",
            put(api_sessions::select_event_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
