//! Text chat endpoint sharing the reply generator and session store with calls.

use crate::api::ApiError;
use crate::greeting::REPLY_FAILURE;
use crate::reply::generate_with_timeout;
use crate::AppState;
use axum::extract::{Extension, Json};
use carecall_types::ChatTurn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Maximum accepted message length (4 KiB).
const MAX_CHAT_MESSAGE_LEN: usize = 4_096;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Continues an existing conversation; a new one is started when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    /// Set when the generator failed and `reply` is the fallback apology.
    pub degraded: bool,
}

/// Handler for `POST /api/chat`.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    if message.len() > MAX_CHAT_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "message exceeds {} bytes",
            MAX_CHAT_MESSAGE_LEN
        )));
    }

    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("chat-{}", Uuid::new_v4()));

    state.sessions.get_or_create(&session_id);
    state
        .sessions
        .append_turn(&session_id, ChatTurn::user(message));
    let history = state.sessions.history(&session_id);

    let (reply, degraded) =
        match generate_with_timeout(state.reply.as_ref(), &state.config.reply, &session_id, &history)
            .await
        {
            Ok(text) => (text, false),
            Err(e) => {
                tracing::warn!(session_id = %session_id, "chat reply failed: {}", e);
                (REPLY_FAILURE.to_string(), true)
            }
        };
    state
        .sessions
        .append_turn(&session_id, ChatTurn::assistant(reply.clone()));

    Ok(Json(ChatResponse {
        session_id,
        reply,
        degraded,
    }))
}
