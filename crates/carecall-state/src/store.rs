//! The process-wide session store.
//!
//! Every operation takes the lock for a short, synchronous critical section
//! and returns owned data, so callers never hold the lock across `.await`.
//! Entries are created lazily by writes; reads of an unknown session return
//! empty results rather than creating an entry.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use carecall_types::{CalendarEvent, ChatTurn};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StateError;
use crate::event::LatencyEvent;

struct SessionEntry {
    created: Instant,
    created_at: DateTime<Utc>,
    found_events: Vec<CalendarEvent>,
    current_event_id: Option<String>,
    history: Vec<ChatTurn>,
    latency: Vec<LatencyEvent>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            created_at: Utc::now(),
            found_events: Vec::new(),
            current_event_id: None,
            history: Vec::new(),
            latency: Vec::new(),
        }
    }

    fn current_event(&self) -> Option<CalendarEvent> {
        let id = self.current_event_id.as_deref()?;
        self.found_events.iter().find(|e| e.id == id).cloned()
    }

    fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_id: session_id.to_string(),
            created_at: self.created_at,
            found_events: self.found_events.clone(),
            current_event_id: self.current_event_id.clone(),
            current_event: self.current_event(),
            history: self.history.clone(),
            latency: self.latency.clone(),
        }
    }
}

/// Point-in-time copy of one session's state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub found_events: Vec<CalendarEvent>,
    pub current_event_id: Option<String>,
    /// The selected event, when the selection refers to a found event.
    pub current_event: Option<CalendarEvent>,
    pub history: Vec<ChatTurn>,
    pub latency: Vec<LatencyEvent>,
}

/// In-memory, per-session state shared by calls and chat sessions.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-update; the map
    // itself is still structurally valid, so keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry<T>(&self, session_id: &str, f: impl FnOnce(&mut SessionEntry) -> T) -> T {
        let mut sessions = self.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionEntry::new);
        f(entry)
    }

    /// Returns the session, creating an empty entry on first access.
    pub fn get_or_create(&self, session_id: &str) -> SessionSnapshot {
        self.with_entry(session_id, |entry| entry.snapshot(session_id))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    /// Appends a found event. An event whose id is already present is
    /// replaced in place, keeping its position.
    pub fn add_found_event(&self, session_id: &str, event: CalendarEvent) {
        self.with_entry(session_id, |entry| {
            match entry.found_events.iter_mut().find(|e| e.id == event.id) {
                Some(existing) => *existing = event,
                None => entry.found_events.push(event),
            }
        });
    }

    pub fn get_found_events(&self, session_id: &str) -> Vec<CalendarEvent> {
        self.read()
            .get(session_id)
            .map(|entry| entry.found_events.clone())
            .unwrap_or_default()
    }

    /// Drops the found events and the selection, e.g. before a new search.
    pub fn clear_found_events(&self, session_id: &str) {
        if let Some(entry) = self.write().get_mut(session_id) {
            entry.found_events.clear();
            entry.current_event_id = None;
        }
    }

    /// Sets the selected event id. Last write wins; `None` clears it.
    pub fn set_current_event(&self, session_id: &str, event_id: Option<String>) {
        self.with_entry(session_id, |entry| entry.current_event_id = event_id);
    }

    pub fn get_current_event(&self, session_id: &str) -> Option<String> {
        self.read()
            .get(session_id)
            .and_then(|entry| entry.current_event_id.clone())
    }

    /// Selects one of the found events by its id.
    pub fn select_event_by_id(
        &self,
        session_id: &str,
        event_id: &str,
    ) -> Result<CalendarEvent, StateError> {
        let mut sessions = self.write();
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()))?;
        let event = entry
            .found_events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .ok_or_else(|| StateError::EventNotFound(event_id.to_string()))?;
        entry.current_event_id = Some(event.id.clone());
        Ok(event)
    }

    /// Selects one of the found events by its zero-based position.
    pub fn select_event_by_index(
        &self,
        session_id: &str,
        index: usize,
    ) -> Result<CalendarEvent, StateError> {
        let mut sessions = self.write();
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()))?;
        let event = entry
            .found_events
            .get(index)
            .cloned()
            .ok_or(StateError::EventIndexOutOfRange {
                index,
                len: entry.found_events.len(),
            })?;
        entry.current_event_id = Some(event.id.clone());
        Ok(event)
    }

    pub fn append_turn(&self, session_id: &str, turn: ChatTurn) {
        self.with_entry(session_id, |entry| entry.history.push(turn));
    }

    pub fn history(&self, session_id: &str) -> Vec<ChatTurn> {
        self.read()
            .get(session_id)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    /// Appends a telemetry record stamped with the time since the session
    /// entry was created.
    pub fn emit_latency_event(
        &self,
        session_id: &str,
        name: &str,
        metadata: serde_json::Value,
    ) -> LatencyEvent {
        self.with_entry(session_id, |entry| {
            let event = LatencyEvent {
                name: name.to_string(),
                at_ms: entry.created.elapsed().as_millis() as u64,
                recorded_at: Utc::now(),
                metadata,
            };
            entry.latency.push(event.clone());
            event
        })
    }

    pub fn latency_events(&self, session_id: &str) -> Vec<LatencyEvent> {
        self.read()
            .get(session_id)
            .map(|entry| entry.latency.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, StateError> {
        self.read()
            .get(session_id)
            .map(|entry| entry.snapshot(session_id))
            .ok_or_else(|| StateError::SessionNotFound(session_id.to_string()))
    }

    /// Discards a session entry, returning its final state.
    pub fn remove(&self, session_id: &str) -> Option<SessionSnapshot> {
        let removed = self.write().remove(session_id)?;
        tracing::debug!(session_id, "session state evicted");
        Some(removed.snapshot(session_id))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
