//! Reorder Buffer
//!
//! Restores strict sequence order from events that arrive out of order.
//! Events are held in a pending set keyed by sequence id; whenever the id
//! right after `last_released` is present it is released, repeatedly, so the
//! caller always receives a gap-free ascending run.
//!
//! Memory is bounded two ways:
//! - a capacity ceiling on pending entries, handled by [`OverflowAction`]
//! - an optional maximum wait for a missing id, after which the gap is
//!   force-skipped and reported as lost
//!
//! The buffer is a plain data structure. It is owned by the sequencer task,
//! which is what makes the release-then-dispatch cycle a single
//! serialization point.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ReorderError;
use crate::types::{Event, SequenceId};

/// Default ceiling on pending entries
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Default maximum wait for a missing sequence id
pub const DEFAULT_MAX_GAP_WAIT: Duration = Duration::from_secs(5);

/// What to do when an event arrives and the pending set is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowAction {
    /// Refuse the event; the caller stops reading from its source
    #[default]
    RejectSource,
    /// Give up on the missing ids below the lowest pending entry
    SkipGap,
}

/// Reorder buffer configuration
#[derive(Debug, Clone, Copy)]
pub struct ReorderConfig {
    /// Maximum number of pending (out-of-order) events
    pub capacity: usize,
    /// Maximum wait for a missing id; `None` waits forever
    pub max_gap_wait: Option<Duration>,
    /// Action taken when `capacity` is reached
    pub overflow: OverflowAction,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_gap_wait: Some(DEFAULT_MAX_GAP_WAIT),
            overflow: OverflowAction::default(),
        }
    }
}

/// How an arrival was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Event was new and is now pending or released
    Accepted,
    /// An event with this id is already pending
    Duplicate,
    /// An event with this id was already released
    Stale,
}

/// Inclusive range of sequence ids that were given up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapSkipped {
    pub first: SequenceId,
    pub last: SequenceId,
}

impl GapSkipped {
    /// Number of ids lost
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Result of [`ReorderBuffer::insert`] or [`ReorderBuffer::expire`]
#[derive(Debug, Default)]
pub struct Release {
    /// Events now in order, ascending and contiguous (apart from `skipped`)
    pub events: Vec<Event>,
    /// Gap that was force-skipped to make progress, if any
    pub skipped: Option<GapSkipped>,
}

/// Out-of-order event buffer
#[derive(Debug)]
pub struct ReorderBuffer {
    config: ReorderConfig,
    pending: BTreeMap<SequenceId, Event>,
    last_released: SequenceId,
    /// Missing id currently waited for, and since when
    waiting: Option<(SequenceId, Instant)>,
}

impl ReorderBuffer {
    /// Create an empty buffer expecting sequence id 1 next
    pub fn new(config: ReorderConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
            last_released: 0,
            waiting: None,
        }
    }

    /// Accept one event and release everything that is now in order.
    ///
    /// Duplicate and stale arrivals are no-ops. When the pending set is full
    /// the configured [`OverflowAction`] applies; an event that is itself the
    /// next expected id is always accepted.
    pub fn insert(
        &mut self,
        event: Event,
        now: Instant,
    ) -> Result<(InsertOutcome, Release), ReorderError> {
        let sequence_id = event.sequence_id;

        if sequence_id <= self.last_released {
            return Ok((InsertOutcome::Stale, Release::default()));
        }
        if self.pending.contains_key(&sequence_id) {
            return Ok((InsertOutcome::Duplicate, Release::default()));
        }

        let mut skipped = None;
        if Some(sequence_id) != self.next_expected() && self.pending.len() >= self.config.capacity {
            match self.config.overflow {
                OverflowAction::RejectSource => {
                    return Err(ReorderError::CapacityExceeded {
                        capacity: self.config.capacity,
                        sequence_id,
                    });
                }
                OverflowAction::SkipGap => {
                    let lowest = self
                        .pending
                        .keys()
                        .next()
                        .copied()
                        .map_or(sequence_id, |first| first.min(sequence_id));
                    skipped = self.skip_to(lowest);
                }
            }
        }

        self.pending.insert(sequence_id, event);

        let events = self.release_ready();
        self.refresh_wait(now);

        Ok((InsertOutcome::Accepted, Release { events, skipped }))
    }

    /// When the gap currently waited for times out, if there is one
    pub fn gap_deadline(&self) -> Option<Instant> {
        let max_wait = self.config.max_gap_wait?;
        self.waiting.map(|(_, since)| since + max_wait)
    }

    /// Force-skip the current gap if its deadline has passed.
    ///
    /// Returns `None` when there is nothing to skip yet.
    pub fn expire(&mut self, now: Instant) -> Option<Release> {
        let deadline = self.gap_deadline()?;
        if now < deadline {
            return None;
        }

        let lowest = *self.pending.keys().next()?;
        let skipped = self.skip_to(lowest);
        let events = self.release_ready();
        self.refresh_wait(now);

        Some(Release { events, skipped })
    }

    /// Highest sequence id released so far (0 before the first release)
    pub fn last_released(&self) -> SequenceId {
        self.last_released
    }

    /// Sequence id the buffer is waiting for.
    ///
    /// `None` once `SequenceId::MAX` has been released; every later arrival
    /// is stale.
    pub fn next_expected(&self) -> Option<SequenceId> {
        self.last_released.checked_add(1)
    }

    /// Number of events held out of order
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get the configuration
    pub fn config(&self) -> &ReorderConfig {
        &self.config
    }

    /// Move `last_released` up to just below `target`, reporting the lost ids
    fn skip_to(&mut self, target: SequenceId) -> Option<GapSkipped> {
        let first = self.next_expected()?;
        if target <= first {
            return None;
        }
        self.last_released = target - 1;
        Some(GapSkipped {
            first,
            last: target - 1,
        })
    }

    fn release_ready(&mut self) -> Vec<Event> {
        let mut released = Vec::new();
        while let Some(event) = self
            .next_expected()
            .and_then(|next| self.pending.remove(&next))
        {
            self.last_released = event.sequence_id;
            released.push(event);
        }
        released
    }

    fn refresh_wait(&mut self, now: Instant) {
        let missing = match self.next_expected() {
            Some(missing) if !self.pending.is_empty() => missing,
            _ => {
                self.waiting = None;
                return;
            }
        };

        match self.waiting {
            Some((id, _)) if id == missing => {}
            _ => self.waiting = Some((missing, now)),
        }
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(ReorderConfig::default())
    }
}
