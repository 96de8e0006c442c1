//! Per-session mutable state for CareCall.
//!
//! A session is either a phone call (keyed by its media-stream id) or a chat
//! conversation (keyed by a generated id). Each holds the calendar events the
//! scheduling service found, the caller's current selection among them, the
//! conversation history fed to the reply generator, and an append-only list
//! of latency telemetry.
//!
//! State is in-memory only and process-wide. Entries are created lazily and
//! evicted explicitly when a call ends (if configured).

pub mod error;
pub mod event;
pub mod store;

pub use error::StateError;
pub use event::{LatencyEvent, LatencyMark, ParseLatencyMarkError};
pub use store::{SessionSnapshot, SessionStore};
