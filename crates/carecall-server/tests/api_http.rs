mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use carecall_server::app;
use carecall_server::greeting::REPLY_FAILURE;
use carecall_state::SessionStore;
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn setup(reply: Arc<MockReply>) -> (Router, Arc<SessionStore>) {
    let mut config = test_config("ws://127.0.0.1:1/v1/listen");
    config.server.public_url = Some("https://calls.example.org".to_string());
    let state = test_state(config, reply);
    let sessions = state.sessions.clone();
    (app(state), sessions)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn checkup(id: &str, summary: &str) -> Value {
    json!({
        "id": id,
        "summary": summary,
        "start": "2025-03-11T09:00:00-05:00",
        "end": "2025-03-11T09:30:00-05:00"
    })
}

// ── health and webhook ───────────────────────────────────────────────

#[tokio::test]
async fn health_reports_active_calls() {
    let (app, _) = setup(MockReply::answering("hi"));
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_calls"], 0);
}

#[tokio::test]
async fn voice_webhook_connects_the_media_stream() {
    let (app, _) = setup(MockReply::answering("hi"));
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/voice")
                .header(header::HOST, "internal:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let twiml = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(twiml.contains("<Connect><Stream url=\"wss://calls.example.org/media\"/></Connect>"));
}

// ── chat ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_starts_and_continues_a_session() {
    let reply = MockReply::answering("What day suits you?");
    let (app, sessions) = setup(reply.clone());

    let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "I need a checkup" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "What day suits you?");
    assert_eq!(body["degraded"], false);
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("chat-"));

    let (status, _) = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": session_id, "message": "Thursday" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(reply.call_count(), 2);
    let history = sessions.history(&session_id);
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].content, "Thursday");
}

#[tokio::test]
async fn chat_failure_degrades_to_an_apology() {
    let (app, _) = setup(MockReply::failing());
    let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], REPLY_FAILURE);
    assert_eq!(body["degraded"], true);
}

#[tokio::test]
async fn chat_rejects_blank_messages() {
    let reply = MockReply::answering("hi");
    let (app, _) = setup(reply.clone());
    let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "message": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));
    assert_eq!(reply.call_count(), 0);
}

// ── sessions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (app, _) = setup(MockReply::answering("hi"));
    let (status, body) = send(&app, "GET", "/api/sessions/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn found_events_can_be_recorded_and_selected() {
    let (app, sessions) = setup(MockReply::answering("hi"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/sessions/MZ42/events",
        Some(json!({ "events": [checkup("evt-1", "Checkup"), checkup("evt-2", "Cleaning")] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found_events"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/sessions/MZ42/current-event",
        Some(json!({ "index": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_event"]["id"], "evt-2");
    assert_eq!(sessions.get_current_event("MZ42").as_deref(), Some("evt-2"));

    let (status, body) = send(&app, "GET", "/api/sessions/MZ42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_event_id"], "evt-2");
    assert_eq!(body["current_event"]["summary"], "Cleaning");

    // Replacing drops the earlier events and the selection.
    let (status, body) = send(
        &app,
        "POST",
        "/api/sessions/MZ42/events",
        Some(json!({ "events": [checkup("evt-9", "Follow-up")], "replace": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found_events"].as_array().unwrap().len(), 1);
    assert!(sessions.get_current_event("MZ42").is_none());
}

#[tokio::test]
async fn invalid_selections_are_rejected() {
    let (app, _) = setup(MockReply::answering("hi"));
    send(
        &app,
        "POST",
        "/api/sessions/MZ7/events",
        Some(json!({ "events": [checkup("evt-1", "Checkup")] })),
    )
    .await;

    let (status, _) = send(&app, "PUT", "/api/sessions/MZ7/current-event", Some(json!({ "index": 5 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/sessions/MZ7/current-event",
        Some(json!({ "event_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/sessions/MZ7/current-event",
        Some(json!({ "event_id": "evt-1", "index": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/api/sessions/ghost/current-event", Some(json!({ "index": 0 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
