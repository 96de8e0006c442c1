//! Error types for session state lookups.

/// Errors returned by [`SessionStore`](crate::SessionStore) lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// No entry exists for the session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A positional selection fell outside the found-events list.
    #[error("event index {index} out of range ({len} events found)")]
    EventIndexOutOfRange { index: usize, len: usize },

    /// The event id is not among the session's found events.
    #[error("event not found: {0}")]
    EventNotFound(String),
}
