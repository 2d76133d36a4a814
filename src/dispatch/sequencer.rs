//! Sequencer task
//!
//! The single serialization point of the server: owns the reorder buffer and
//! the dispatcher, so exactly one "release next event, mutate the graph or
//! resolve recipients, enqueue" cycle runs at a time.

use std::future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::Dispatcher;
use crate::reorder::{InsertOutcome, Release, ReorderBuffer, ReorderConfig};
use crate::stats::Stats;
use crate::types::{Event, SequenceId};

/// One parsed event on its way to the sequencer
#[derive(Debug)]
pub struct Ingest {
    pub event: Event,
    /// Cancelled to make the originating source connection close
    pub source: CancellationToken,
}

/// Reorder progress, readable from other tasks
#[derive(Debug, Default)]
pub struct SequencerProgress {
    last_released: AtomicU64,
    pending: AtomicUsize,
}

impl SequencerProgress {
    pub fn last_released(&self) -> SequenceId {
        self.last_released.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            last_released: self.last_released(),
            pending: self.pending(),
        }
    }
}

/// Point-in-time copy of [`SequencerProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub last_released: SequenceId,
    pub pending: usize,
}

/// Reorder buffer + dispatcher, driven from one task
pub struct Sequencer {
    buffer: ReorderBuffer,
    dispatcher: Dispatcher,
    stats: Arc<Stats>,
    progress: Arc<SequencerProgress>,
}

impl Sequencer {
    pub fn new(config: ReorderConfig, dispatcher: Dispatcher, stats: Arc<Stats>) -> Self {
        Self {
            buffer: ReorderBuffer::new(config),
            dispatcher,
            stats,
            progress: Arc::new(SequencerProgress::default()),
        }
    }

    /// Shared view of reorder progress
    pub fn progress(&self) -> Arc<SequencerProgress> {
        Arc::clone(&self.progress)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Insert one event and dispatch everything that became ready.
    ///
    /// A full buffer with [`crate::reorder::OverflowAction::RejectSource`]
    /// cancels `ingest.source`.
    pub fn ingest(&mut self, ingest: Ingest) {
        let sequence_id = ingest.event.sequence_id;

        match self.buffer.insert(ingest.event, Instant::now()) {
            Ok((InsertOutcome::Accepted, release)) => self.apply(release),
            Ok((outcome, _)) => {
                self.stats.duplicate_event();
                tracing::debug!(sequence_id, ?outcome, "ignoring repeated sequence id");
            }
            Err(e) => {
                self.stats.source_rejected();
                tracing::warn!(error = %e, "rejecting event source");
                ingest.source.cancel();
            }
        }
        self.publish_progress();
    }

    /// Skip the current gap if it has waited too long
    pub fn expire_gap(&mut self, now: Instant) {
        if let Some(release) = self.buffer.expire(now) {
            self.apply(release);
            self.publish_progress();
        }
    }

    /// Run until `shutdown` is cancelled or every ingest sender is dropped
    pub async fn run(mut self, mut rx: mpsc::Receiver<Ingest>, shutdown: CancellationToken) {
        let config = self.buffer.config();
        tracing::debug!(
            capacity = config.capacity,
            max_gap_wait = ?config.max_gap_wait,
            overflow = ?config.overflow,
            "sequencer started"
        );

        loop {
            let deadline = self.buffer.gap_deadline();
            let gap_timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                next = rx.recv() => match next {
                    Some(ingest) => self.ingest(ingest),
                    None => break,
                },

                _ = gap_timer => self.expire_gap(Instant::now()),
            }
        }

        tracing::info!(
            last_released = self.buffer.last_released(),
            pending = self.buffer.pending_len(),
            "sequencer stopped"
        );
    }

    fn apply(&mut self, release: Release) {
        if let Some(gap) = release.skipped {
            self.stats.sequence_ids_skipped(gap.count());
            tracing::warn!(
                first = gap.first,
                last = gap.last,
                lost = gap.count(),
                "sequence gap skipped, events lost"
            );
        }

        for event in release.events {
            self.stats.event_dispatched();
            if let Err(e) = self.dispatcher.dispatch(&event) {
                tracing::debug!(error = %e, "event skipped");
            }
        }
    }

    fn publish_progress(&self) {
        self.progress
            .last_released
            .store(self.buffer.last_released(), Ordering::Relaxed);
        self.progress
            .pending
            .store(self.buffer.pending_len(), Ordering::Relaxed);
    }
}
