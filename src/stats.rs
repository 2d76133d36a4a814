//! Runtime counters
//!
//! Every steady-state error is recovered locally and counted here; the admin
//! API and the shutdown log read these through [`Stats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Server-wide counters
#[derive(Debug, Default)]
pub struct Stats {
    /// Well-formed events read from event sources
    pub events_received: AtomicU64,

    /// Lines rejected by the parser
    pub parse_errors: AtomicU64,

    /// Events released in order and handed to the dispatcher
    pub events_dispatched: AtomicU64,

    /// Arrivals whose sequence id was already pending or released
    pub duplicate_events: AtomicU64,

    /// Events with a type the dispatcher cannot route
    pub protocol_errors: AtomicU64,

    /// Sequence ids given up on by a forced gap skip
    pub sequence_ids_skipped: AtomicU64,

    /// Event-source connections closed because the reorder buffer was full
    pub sources_rejected: AtomicU64,

    /// Notifications placed on a client queue
    pub notifications_enqueued: AtomicU64,

    /// Private messages and follow notices for offline users
    pub notifications_offline: AtomicU64,

    /// Client sessions registered
    pub clients_registered: AtomicU64,

    /// Sessions replaced by a newer connection with the same id
    pub clients_superseded: AtomicU64,

    /// Sessions disconnected because their queue overflowed
    pub clients_evicted: AtomicU64,
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        #[inline]
        pub fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Stats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    counter!(event_received, events_received);
    counter!(parse_error, parse_errors);
    counter!(event_dispatched, events_dispatched);
    counter!(duplicate_event, duplicate_events);
    counter!(protocol_error, protocol_errors);
    counter!(source_rejected, sources_rejected);
    counter!(notification_enqueued, notifications_enqueued);
    counter!(notification_offline, notifications_offline);
    counter!(client_registered, clients_registered);
    counter!(client_superseded, clients_superseded);
    counter!(client_evicted, clients_evicted);

    /// Record a forced skip over `count` missing sequence ids
    #[inline]
    pub fn sequence_ids_skipped(&self, count: u64) {
        self.sequence_ids_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            sequence_ids_skipped: self.sequence_ids_skipped.load(Ordering::Relaxed),
            sources_rejected: self.sources_rejected.load(Ordering::Relaxed),
            notifications_enqueued: self.notifications_enqueued.load(Ordering::Relaxed),
            notifications_offline: self.notifications_offline.load(Ordering::Relaxed),
            clients_registered: self.clients_registered.load(Ordering::Relaxed),
            clients_superseded: self.clients_superseded.load(Ordering::Relaxed),
            clients_evicted: self.clients_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub parse_errors: u64,
    pub events_dispatched: u64,
    pub duplicate_events: u64,
    pub protocol_errors: u64,
    pub sequence_ids_skipped: u64,
    pub sources_rejected: u64,
    pub notifications_enqueued: u64,
    pub notifications_offline: u64,
    pub clients_registered: u64,
    pub clients_superseded: u64,
    pub clients_evicted: u64,
}
