//! Error types
//!
//! One enum per failure domain. Only [`ServerError::Bind`] is fatal; the rest
//! are recovered where they occur and counted in [`crate::stats::Stats`].

use std::io;

use crate::types::{EventType, SequenceId, UserId};

/// Malformed event-source line. Never reaches the reorder buffer.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("empty event line")]
    Empty,

    #[error("invalid sequence id: {0:?}")]
    InvalidSequenceId(String),

    #[error("sequence id 0 is reserved, ids start at 1")]
    ZeroSequenceId,

    #[error("missing event type")]
    MissingType,

    #[error("unknown event type: {0:?}")]
    UnknownType(String),

    #[error("{event_type} event expects {expected} fields, found {found}")]
    FieldCount {
        event_type: EventType,
        expected: usize,
        found: usize,
    },

    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
}

/// Reorder buffer refused an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    /// Pending set is full and the overflow action is to reject the source
    #[error("reorder buffer full ({capacity} pending), rejected sequence id {sequence_id}")]
    CapacityExceeded {
        capacity: usize,
        sequence_id: SequenceId,
    },
}

/// Event reached the dispatcher with a type it cannot route
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("protocol error: unrecognized event type {tag:?} at sequence id {sequence_id}")]
    Protocol {
        sequence_id: SequenceId,
        tag: String,
    },
}

/// Notification could not be queued for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery queue for client {client_id} is full")]
    QueueFull { client_id: UserId },

    #[error("session for client {client_id} is closed")]
    Closed { client_id: UserId },
}

/// Invalid configuration value
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server startup and runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind a listener
    #[error("failed to bind {name} listener to {address}: {source}")]
    Bind {
        name: &'static str,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
