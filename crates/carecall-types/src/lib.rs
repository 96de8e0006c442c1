//! Shared types for the CareCall voice agent.
//!
//! This crate provides the data model used across the workspace: transcript
//! events produced by speech-to-text, calendar events returned by the
//! external scheduling service, conversation turns, and the telephony
//! media-stream wire messages.
//!
//! Every other crate depends on `carecall-types` for cross-cutting type
//! definitions and nothing here depends on another workspace crate.

pub mod media;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use media::{InboundEvent, MediaFormat, OutboundEvent, StartMetadata};

/// A speech-to-text result.
///
/// Partial results (`is_final == false`) may be superseded by later partials
/// and are informational only. Final results mark an utterance boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcribed text of the top-ranked alternative.
    pub text: String,
    /// Whether the provider marked this result as stable.
    pub is_final: bool,
    /// Wall-clock time the event was received.
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp: Utc::now(),
        }
    }

    pub fn final_result(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            timestamp: Utc::now(),
        }
    }
}

/// A calendar event found by the external scheduling service.
///
/// The voice agent does not interpret these beyond their identifier; they are
/// stored per session so the caller can refer back to them ("the second one").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider-assigned event identifier.
    pub id: String,
    /// Short title, e.g. "Dental cleaning - J. Perez".
    pub summary: String,
    /// Start time in RFC 3339.
    pub start: String,
    /// End time in RFC 3339.
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Returns the chat-completions role label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of the conversation history passed to the reply generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
