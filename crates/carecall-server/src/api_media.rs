//! Telephony media-stream WebSocket endpoint.

use crate::call::CallSessionManager;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Stream identifiers of calls currently in progress.
///
/// Uses `std::sync::RwLock`: every acquisition is a single set operation
/// that never spans an `.await`.
#[derive(Clone, Default)]
pub struct CallRegistry {
    active: Arc<RwLock<HashSet<String>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `stream_sid` for a new call. Returns `false` if another call
    /// already holds it.
    pub fn register(&self, stream_sid: &str) -> bool {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(stream_sid.to_string())
    }

    pub fn unregister(&self, stream_sid: &str) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.remove(stream_sid);
    }

    pub fn contains(&self, stream_sid: &str) -> bool {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.contains(stream_sid)
    }

    pub fn len(&self) -> usize {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler for `GET /media`, upgraded by the telephony provider.
pub async fn media_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();

    // Bounded so a stalled transport applies backpressure to synthesis
    // instead of buffering the whole reply.
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    tracing::debug!("media stream accepted");
    CallSessionManager::new(state, tx).run(receiver).await;

    // Turn tasks hold sender clones until they are aborted.
    if let Err(e) = send_task.await {
        tracing::warn!("media stream writer failed: {}", e);
    }
}
