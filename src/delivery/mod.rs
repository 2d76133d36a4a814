//! Delivery Queue & Writer
//!
//! Each client session owns one bounded FIFO of outbound notifications and
//! one writer task draining it onto the connection. The queue decouples the
//! dispatcher from socket speed: enqueueing never waits, and a full queue is
//! reported to the caller instead of dropping or reordering anything.

mod writer;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::types::UserId;

pub use writer::{Writer, WriterExit};

/// Default per-client queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Payload of one notification, shared between all its recipients
pub type Notification = Arc<str>;

/// What happens to a session whose queue overflows.
///
/// Both actions end the connection, so a client never observes a gap
/// without also observing the disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOverflowAction {
    /// Close immediately and discard whatever is still queued
    #[default]
    Disconnect,
    /// Stop accepting notifications, write what is queued, then close
    DrainThenDisconnect,
}

/// Sending half of a client's bounded notification queue
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    client_id: UserId,
    tx: mpsc::Sender<Notification>,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` notifications
    pub fn bounded(client_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { client_id, tx }, rx)
    }

    /// Queue a notification without waiting
    pub fn enqueue(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull {
                client_id: self.client_id,
            },
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed {
                client_id: self.client_id,
            },
        })
    }

    /// Number of notifications waiting to be written
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Check if nothing is waiting to be written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued notifications
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Check if the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_preserves_fifo_order() {
        let (queue, mut rx) = DeliveryQueue::bounded(1, 4);

        queue.enqueue(Arc::from("1|B")).unwrap();
        queue.enqueue(Arc::from("2|B")).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(&*rx.try_recv().unwrap(), "1|B");
        assert_eq!(&*rx.try_recv().unwrap(), "2|B");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_reports_full() {
        let (queue, _rx) = DeliveryQueue::bounded(7, 1);

        queue.enqueue(Arc::from("1|B")).unwrap();
        let err = queue.enqueue(Arc::from("2|B")).unwrap_err();
        assert_eq!(err, DeliveryError::QueueFull { client_id: 7 });
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_enqueue_reports_closed() {
        let (queue, rx) = DeliveryQueue::bounded(3, 4);
        drop(rx);

        assert!(queue.is_closed());
        let err = queue.enqueue(Arc::from("1|B")).unwrap_err();
        assert_eq!(err, DeliveryError::Closed { client_id: 3 });
    }
}
