//! Event types for the notification stream
//!
//! This module defines the structured form of an event-source line and the
//! parser that builds it. Every event carries its original text so that it
//! can be forwarded to recipients verbatim.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::{SequenceId, UserId};
use crate::error::ParseError;

/// Field separator on the event-source wire
const FIELD_SEPARATOR: char = '|';

/// Event types that can occur on the event-source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// `F` - a user starts following another user
    Follow,
    /// `U` - a user stops following another user
    Unfollow,
    /// `B` - a message for every connected user
    Broadcast,
    /// `P` - a message from one user to another
    PrivateMessage,
    /// `S` - a status update sent to the followers of a user
    StatusUpdate,
}

impl EventType {
    /// Resolve a wire tag into an event type
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "F" => Some(EventType::Follow),
            "U" => Some(EventType::Unfollow),
            "B" => Some(EventType::Broadcast),
            "P" => Some(EventType::PrivateMessage),
            "S" => Some(EventType::StatusUpdate),
            _ => None,
        }
    }

    /// Wire tag of this event type
    pub fn tag(&self) -> &'static str {
        match self {
            EventType::Follow => "F",
            EventType::Unfollow => "U",
            EventType::Broadcast => "B",
            EventType::PrivateMessage => "P",
            EventType::StatusUpdate => "S",
        }
    }

    /// Number of `|`-separated fields a well-formed line of this type has
    pub fn field_count(&self) -> usize {
        match self {
            EventType::Broadcast => 2,
            EventType::StatusUpdate => 3,
            EventType::Follow | EventType::Unfollow | EventType::PrivateMessage => 4,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Follow => write!(f, "follow"),
            EventType::Unfollow => write!(f, "unfollow"),
            EventType::Broadcast => write!(f, "broadcast"),
            EventType::PrivateMessage => write!(f, "private_message"),
            EventType::StatusUpdate => write!(f, "status_update"),
        }
    }
}

/// Typed payload of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Follow { from: UserId, to: UserId },
    Unfollow { from: UserId, to: UserId },
    Broadcast,
    PrivateMessage { from: UserId, to: UserId },
    StatusUpdate { from: UserId },
    /// An event type this server does not know how to route.
    ///
    /// The line parser rejects unknown tags, so this only shows up for events
    /// built directly through [`Event::new`].
    Unrecognized { tag: String },
}

impl EventKind {
    /// The event type, or `None` for unrecognized events
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            EventKind::Follow { .. } => Some(EventType::Follow),
            EventKind::Unfollow { .. } => Some(EventType::Unfollow),
            EventKind::Broadcast => Some(EventType::Broadcast),
            EventKind::PrivateMessage { .. } => Some(EventType::PrivateMessage),
            EventKind::StatusUpdate { .. } => Some(EventType::StatusUpdate),
            EventKind::Unrecognized { .. } => None,
        }
    }
}

/// A single sequence-numbered event from the event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub sequence_id: SequenceId,
    pub kind: EventKind,
    /// Original line, without the trailing newline
    pub raw: Arc<str>,
}

impl Event {
    /// Create an event from already-structured parts
    pub fn new(sequence_id: SequenceId, kind: EventKind, raw: impl Into<Arc<str>>) -> Self {
        Self {
            sequence_id,
            kind,
            raw: raw.into(),
        }
    }

    /// Parse one event-source line.
    ///
    /// The type tag is resolved first, then the field count and ids are
    /// validated for that type.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();

        let sequence_id: SequenceId = parse_decimal(fields[0])
            .ok_or_else(|| ParseError::InvalidSequenceId(fields[0].to_string()))?;
        if sequence_id == 0 {
            return Err(ParseError::ZeroSequenceId);
        }

        let tag = fields.get(1).ok_or(ParseError::MissingType)?;
        let event_type =
            EventType::from_tag(tag).ok_or_else(|| ParseError::UnknownType(tag.to_string()))?;

        if fields.len() != event_type.field_count() {
            return Err(ParseError::FieldCount {
                event_type,
                expected: event_type.field_count(),
                found: fields.len(),
            });
        }

        let kind = match event_type {
            EventType::Follow => EventKind::Follow {
                from: parse_user_id(fields[2])?,
                to: parse_user_id(fields[3])?,
            },
            EventType::Unfollow => EventKind::Unfollow {
                from: parse_user_id(fields[2])?,
                to: parse_user_id(fields[3])?,
            },
            EventType::Broadcast => EventKind::Broadcast,
            EventType::PrivateMessage => EventKind::PrivateMessage {
                from: parse_user_id(fields[2])?,
                to: parse_user_id(fields[3])?,
            },
            EventType::StatusUpdate => EventKind::StatusUpdate {
                from: parse_user_id(fields[2])?,
            },
        };

        Ok(Self::new(sequence_id, kind, line))
    }

    /// The event type, or `None` for unrecognized events
    pub fn event_type(&self) -> Option<EventType> {
        self.kind.event_type()
    }

    /// Sender of the event (absent for broadcasts)
    pub fn from_id(&self) -> Option<UserId> {
        match self.kind {
            EventKind::Follow { from, .. }
            | EventKind::Unfollow { from, .. }
            | EventKind::PrivateMessage { from, .. }
            | EventKind::StatusUpdate { from } => Some(from),
            EventKind::Broadcast | EventKind::Unrecognized { .. } => None,
        }
    }

    /// Target of the event (only for follow, unfollow and private messages)
    pub fn to_id(&self) -> Option<UserId> {
        match self.kind {
            EventKind::Follow { to, .. }
            | EventKind::Unfollow { to, .. }
            | EventKind::PrivateMessage { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Human readable type name for logs
    pub fn type_name(&self) -> String {
        match &self.kind {
            EventKind::Unrecognized { tag } => format!("unrecognized({})", tag),
            kind => kind
                .event_type()
                .map(|t| t.to_string())
                .unwrap_or_default(),
        }
    }
}

impl FromStr for Event {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::parse(s)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_user_id(field: &str) -> Result<UserId, ParseError> {
    parse_decimal(field).ok_or_else(|| ParseError::InvalidUserId(field.to_string()))
}

/// Parse an id made of ASCII digits only (no sign, no whitespace)
pub(crate) fn parse_decimal(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
