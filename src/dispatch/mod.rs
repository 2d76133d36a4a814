//! Dispatcher
//!
//! Consumes events strictly in ascending sequence order, applies follow and
//! unfollow events to the [`FollowerGraph`], resolves the recipients of each
//! event and queues the raw payload on their sessions.
//!
//! | Event | Graph | Recipients |
//! |---|---|---|
//! | Follow(from, to) | add edge | `to`, if online |
//! | Unfollow(from, to) | remove edge | none |
//! | Broadcast | - | every live session |
//! | PrivateMessage(from, to) | - | `to`, if online |
//! | StatusUpdate(from) | - | online followers of `from` |
//!
//! Queuing never waits. A recipient whose queue is full is evicted from the
//! registry, so a slow client cannot stall the stream for anyone else.

mod sequencer;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DeliveryError, DispatchError};
use crate::graph::FollowerGraph;
use crate::registry::{ClientRegistry, ClientSession};
use crate::stats::Stats;
use crate::types::{Event, EventKind, UserId};

pub use sequencer::{Ingest, ProgressSnapshot, Sequencer, SequencerProgress};

/// Follower graph shared between the dispatcher (sole writer) and readers
pub type SharedGraph = Arc<RwLock<FollowerGraph>>;

/// What dispatching one event did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Notifications queued
    pub delivered: usize,
    /// Named recipients that had no live session
    pub offline: usize,
    /// Recipients disconnected because their queue was full
    pub evicted: usize,
}

/// Routes in-order events to client sessions
pub struct Dispatcher {
    graph: SharedGraph,
    registry: ClientRegistry,
    stats: Arc<Stats>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty follower graph
    pub fn new(registry: ClientRegistry, stats: Arc<Stats>) -> Self {
        Self {
            graph: Arc::new(RwLock::new(FollowerGraph::new())),
            registry,
            stats,
        }
    }

    /// Handle to the follower graph for read-only consumers
    pub fn graph(&self) -> SharedGraph {
        Arc::clone(&self.graph)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Apply and deliver one event.
    ///
    /// Callers must pass events in ascending sequence order with no gaps
    /// other than ones the reorder buffer reported as skipped.
    pub fn dispatch(&self, event: &Event) -> Result<DispatchOutcome, DispatchError> {
        let mut outcome = DispatchOutcome::default();

        match event.kind {
            EventKind::Follow { from, to } => {
                self.graph.write().add_edge(from, to);
                self.notify_user(to, event, &mut outcome);
            }
            EventKind::Unfollow { from, to } => {
                self.graph.write().remove_edge(from, to);
            }
            EventKind::Broadcast => {
                for session in self.registry.sessions() {
                    self.deliver(&session, event, &mut outcome);
                }
            }
            EventKind::PrivateMessage { to, .. } => {
                self.notify_user(to, event, &mut outcome);
            }
            EventKind::StatusUpdate { from } => {
                let followers = self.graph.read().followers_of(from);
                for follower in followers {
                    if let Some(session) = self.registry.lookup(follower) {
                        self.deliver(&session, event, &mut outcome);
                    }
                }
            }
            EventKind::Unrecognized { ref tag } => {
                self.stats.protocol_error();
                tracing::warn!(
                    sequence_id = event.sequence_id,
                    tag = %tag,
                    "skipping event with unrecognized type"
                );
                return Err(DispatchError::Protocol {
                    sequence_id: event.sequence_id,
                    tag: tag.clone(),
                });
            }
        }

        Ok(outcome)
    }

    fn notify_user(&self, user: UserId, event: &Event, outcome: &mut DispatchOutcome) {
        match self.registry.lookup(user) {
            Some(session) => self.deliver(&session, event, outcome),
            None => {
                outcome.offline += 1;
                self.stats.notification_offline();
            }
        }
    }

    fn deliver(&self, session: &ClientSession, event: &Event, outcome: &mut DispatchOutcome) {
        match session.enqueue(Arc::clone(&event.raw)) {
            Ok(()) => {
                outcome.delivered += 1;
                self.stats.notification_enqueued();
            }
            Err(DeliveryError::QueueFull { .. }) => {
                outcome.evicted += 1;
                self.registry.evict(session);
            }
            // Torn down concurrently; same as offline
            Err(DeliveryError::Closed { .. }) => {
                outcome.offline += 1;
                self.stats.notification_offline();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    use super::*;
    use crate::delivery::QueueOverflowAction;
    use crate::registry::RegistryConfig;

    struct Harness {
        dispatcher: Dispatcher,
        registry: ClientRegistry,
        stats: Arc<Stats>,
    }

    fn harness(queue_capacity: usize) -> Harness {
        let stats = Arc::new(Stats::new());
        let registry = ClientRegistry::new(
            RegistryConfig {
                queue_capacity,
                overflow: QueueOverflowAction::Disconnect,
            },
            Arc::clone(&stats),
        );
        Harness {
            dispatcher: Dispatcher::new(registry.clone(), Arc::clone(&stats)),
            registry,
            stats,
        }
    }

    fn connect(registry: &ClientRegistry, id: UserId) -> Lines<BufReader<DuplexStream>> {
        let (client, server) = tokio::io::duplex(4096);
        registry.register(id, None, server);
        BufReader::new(client).lines()
    }

    fn event(line: &str) -> Event {
        Event::parse(line).unwrap()
    }

    #[tokio::test]
    async fn test_follow_adds_edge_and_notifies_followee() {
        let h = harness(16);
        let mut followee = connect(&h.registry, 2);

        let outcome = h.dispatcher.dispatch(&event("1|F|1|2")).unwrap();
        assert_eq!(outcome.delivered, 1);
        assert!(h.dispatcher.graph().read().contains(1, 2));
        assert_eq!(followee.next_line().await.unwrap().unwrap(), "1|F|1|2");
    }

    #[tokio::test]
    async fn test_follow_offline_still_adds_edge() {
        let h = harness(16);

        let outcome = h.dispatcher.dispatch(&event("1|F|1|2")).unwrap();
        assert_eq!(outcome.offline, 1);
        assert_eq!(outcome.delivered, 0);
        assert!(h.dispatcher.graph().read().contains(1, 2));
    }

    #[tokio::test]
    async fn test_status_update_reaches_followers_only() {
        let h = harness(16);
        let mut follower = connect(&h.registry, 1);
        let _bystander = connect(&h.registry, 3);

        h.dispatcher.dispatch(&event("1|F|1|2")).unwrap();
        let outcome = h.dispatcher.dispatch(&event("2|S|2")).unwrap();

        assert_eq!(outcome.delivered, 1);
        assert_eq!(follower.next_line().await.unwrap().unwrap(), "2|S|2");
    }

    #[tokio::test]
    async fn test_unfollow_stops_status_updates() {
        let h = harness(16);
        let mut follower = connect(&h.registry, 1);

        h.dispatcher.dispatch(&event("1|F|1|2")).unwrap();
        let outcome = h.dispatcher.dispatch(&event("2|U|1|2")).unwrap();
        assert_eq!(outcome, DispatchOutcome::default());

        let outcome = h.dispatcher.dispatch(&event("3|S|2")).unwrap();
        assert_eq!(outcome.delivered, 0);
        assert!(h.dispatcher.graph().read().followers_of(2).is_empty());

        h.dispatcher.dispatch(&event("4|B")).unwrap();
        assert_eq!(follower.next_line().await.unwrap().unwrap(), "4|B");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let h = harness(16);
        let mut a = connect(&h.registry, 1);
        let mut b = connect(&h.registry, 2);

        let outcome = h.dispatcher.dispatch(&event("7|B")).unwrap();
        assert_eq!(outcome.delivered, 2);
        assert_eq!(a.next_line().await.unwrap().unwrap(), "7|B");
        assert_eq!(b.next_line().await.unwrap().unwrap(), "7|B");
    }

    #[tokio::test]
    async fn test_private_message_to_offline_is_dropped() {
        let h = harness(16);
        let _sender = connect(&h.registry, 1);

        let outcome = h.dispatcher.dispatch(&event("1|P|1|2")).unwrap();
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.offline, 1);
        assert_eq!(h.stats.snapshot().notifications_offline, 1);
    }

    #[tokio::test]
    async fn test_private_message_only_to_recipient() {
        let h = harness(16);
        let mut recipient = connect(&h.registry, 2);
        let _sender = connect(&h.registry, 1);

        let outcome = h.dispatcher.dispatch(&event("3|P|1|2")).unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(recipient.next_line().await.unwrap().unwrap(), "3|P|1|2");
    }

    #[tokio::test]
    async fn test_unrecognized_type_is_protocol_error() {
        let h = harness(16);
        let event = Event::new(
            5,
            EventKind::Unrecognized {
                tag: "Q".to_string(),
            },
            "5|Q",
        );

        let err = h.dispatcher.dispatch(&event).unwrap_err();
        assert!(matches!(err, DispatchError::Protocol { sequence_id: 5, .. }));
        assert_eq!(h.stats.snapshot().protocol_errors, 1);

        // Stream continues
        assert!(h.dispatcher.dispatch(&Event::parse("6|B").unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_evicts_recipient() {
        let h = harness(1);
        let (_client, server) = tokio::io::duplex(1);
        let session = h.registry.register(9, None, server);

        // Current-thread runtime: the writer cannot drain until we yield
        session.enqueue(Arc::from("0|B")).unwrap();
        let outcome = h.dispatcher.dispatch(&event("1|P|1|9")).unwrap();

        assert_eq!(outcome.evicted, 1);
        assert_eq!(outcome.delivered, 0);
        assert!(h.registry.lookup(9).is_none());
        assert!(session.is_closed());
        assert_eq!(h.stats.snapshot().clients_evicted, 1);
    }
}
