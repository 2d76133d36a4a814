//! Data types for the notification server
//!
//! This module contains the event model shared by every component.

mod event;

pub use event::{Event, EventKind, EventType};
pub(crate) use event::parse_decimal;

/// Identifier of a user, and of the client connection that represents it
pub type UserId = u64;

/// Global ordering key of an event; valid ids start at 1
pub type SequenceId = u64;

/// Result type for top-level server operations
pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
