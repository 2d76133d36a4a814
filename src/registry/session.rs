//! Client session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::delivery::{DeliveryQueue, Notification, QueueOverflowAction};
use crate::error::DeliveryError;
use crate::types::UserId;

/// Live delivery state of one connected client
#[derive(Debug)]
pub struct ClientSession {
    client_id: UserId,
    /// Unique per process; tells a session apart from its successor
    session_id: u64,
    /// Unix timestamp of registration
    connected_at: i64,
    peer: Option<SocketAddr>,
    queue: DeliveryQueue,
    overflow: QueueOverflowAction,
    closed: AtomicBool,
    /// Stops the writer immediately
    cancel: CancellationToken,
    /// Lets the writer finish what is queued, then stop
    drain: CancellationToken,
}

impl ClientSession {
    pub(crate) fn new(
        client_id: UserId,
        session_id: u64,
        peer: Option<SocketAddr>,
        queue: DeliveryQueue,
        overflow: QueueOverflowAction,
    ) -> Self {
        Self {
            client_id,
            session_id,
            connected_at: chrono::Utc::now().timestamp(),
            peer,
            queue,
            overflow,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            drain: CancellationToken::new(),
        }
    }

    pub fn client_id(&self) -> UserId {
        self.client_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Notifications waiting to be written
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue a notification without waiting
    pub fn enqueue(&self, notification: Notification) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed {
                client_id: self.client_id,
            });
        }
        self.queue.enqueue(notification)
    }

    /// Check if teardown has started
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the writer and release the connection, discarding the queue
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Stop accepting notifications and close once the queue is written
    pub fn close_after_drain(&self) {
        self.closed.store(true, Ordering::Release);
        self.drain.cancel();
    }

    /// Apply the configured overflow action
    pub(crate) fn terminate_on_overflow(&self) {
        match self.overflow {
            QueueOverflowAction::Disconnect => self.close(),
            QueueOverflowAction::DrainThenDisconnect => self.close_after_drain(),
        }
    }

    /// Resolves once the session's connection should be released
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }
}
