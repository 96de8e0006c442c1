//! Session inspection and the calendar-tool callback endpoints.
//!
//! The external tool-calling service reports the events it found through
//! `POST /api/sessions/{id}/events`; the caller's choice ("the second one")
//! is recorded with `PUT /api/sessions/{id}/current-event`.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use carecall_state::SessionSnapshot;
use carecall_types::CalendarEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RecordEventsRequest {
    pub events: Vec<CalendarEvent>,
    /// Drops previously found events (and the selection) first.
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordEventsResponse {
    pub session_id: String,
    pub found_events: Vec<CalendarEvent>,
}

/// Exactly one of `event_id` and `index` (zero-based) must be given.
#[derive(Debug, Deserialize)]
pub struct SelectEventRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectEventResponse {
    pub session_id: String,
    pub current_event: CalendarEvent,
}

/// Handler for `GET /api/sessions/{id}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.sessions.snapshot(&session_id)?))
}

/// Handler for `POST /api/sessions/{id}/events`.
pub async fn record_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<RecordEventsRequest>,
) -> Result<Json<RecordEventsResponse>, ApiError> {
    if let Some(bad) = payload.events.iter().find(|e| e.id.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "event '{}' has an empty id",
            bad.summary
        )));
    }

    state.sessions.get_or_create(&session_id);
    if payload.replace {
        state.sessions.clear_found_events(&session_id);
    }
    let count = payload.events.len();
    for event in payload.events {
        state.sessions.add_found_event(&session_id, event);
    }
    tracing::debug!(session_id = %session_id, count, replace = payload.replace, "recorded found events");

    Ok(Json(RecordEventsResponse {
        found_events: state.sessions.get_found_events(&session_id),
        session_id,
    }))
}

/// Handler for `PUT /api/sessions/{id}/current-event`.
pub async fn select_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SelectEventRequest>,
) -> Result<Json<SelectEventResponse>, ApiError> {
    let current_event = match (payload.event_id, payload.index) {
        (Some(event_id), None) => state.sessions.select_event_by_id(&session_id, &event_id)?,
        (None, Some(index)) => state.sessions.select_event_by_index(&session_id, index)?,
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of event_id or index is required".to_string(),
            ))
        }
    };
    tracing::info!(session_id = %session_id, event_id = %current_event.id, "current event selected");

    Ok(Json(SelectEventResponse {
        session_id,
        current_event,
    }))
}
