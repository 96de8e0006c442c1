//! Telephony voice webhook.

use crate::AppState;
use axum::{
    extract::Extension,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Derives the media-stream WebSocket URL from the configured public URL,
/// falling back to the request's `Host` header.
pub fn media_stream_url(public_url: Option<&str>, host: Option<&str>) -> Option<String> {
    if let Some(base) = public_url {
        let base = base.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("wss://{}", base)
        };
        return Some(format!("{}/media", ws_base));
    }
    host.filter(|h| !h.trim().is_empty())
        .map(|h| format!("wss://{}/media", h.trim()))
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Builds the TwiML document that connects the call to the media stream.
pub fn connect_stream_twiml(stream_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
        escape_attr(stream_url)
    )
}

/// Handler for `POST /voice`.
pub async fn voice_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok());
    let Some(url) = media_stream_url(state.config.server.public_url.as_deref(), host) else {
        tracing::warn!("voice webhook without public_url or Host header");
        return (StatusCode::BAD_REQUEST, "cannot determine media stream URL").into_response();
    };

    tracing::info!(stream_url = %url, "answering incoming call");
    (
        [(header::CONTENT_TYPE, "application/xml")],
        connect_stream_twiml(&url),
    )
        .into_response()
}
