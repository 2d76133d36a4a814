//! Client Registry
//!
//! Maps client ids to their live session. Connection tasks register and
//! unregister concurrently while the dispatcher looks sessions up, so the map
//! sits behind a `parking_lot::RwLock`. A session is always removed from the
//! map before it is torn down, under the same write lock, so a lookup never
//! returns a session mid-teardown.
//!
//! Registering an id that already has a session closes the old one first
//! (last connection wins).

mod session;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::AsyncWrite;

use crate::delivery::{
    DeliveryQueue, QueueOverflowAction, Writer, WriterExit, DEFAULT_QUEUE_CAPACITY,
};
use crate::stats::Stats;
use crate::types::UserId;

pub use session::ClientSession;

/// Per-session delivery settings
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Bounded queue size of every session
    pub queue_capacity: usize,
    /// What to do when a session's queue is full
    pub overflow: QueueOverflowAction,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: QueueOverflowAction::default(),
        }
    }
}

struct RegistryInner {
    sessions: RwLock<HashMap<UserId, Arc<ClientSession>>>,
    next_session_id: AtomicU64,
    config: RegistryConfig,
    stats: Arc<Stats>,
}

/// Concurrency-safe map from client id to live session
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig, stats: Arc<Stats>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: RwLock::new(HashMap::new()),
                next_session_id: AtomicU64::new(1),
                config,
                stats,
            }),
        }
    }

    /// Create a session for `client_id` writing to `sink`, and start its writer.
    ///
    /// Any previous session for the same id is closed before the new one
    /// becomes visible to lookups. Must be called from within a Tokio runtime.
    pub fn register<W>(
        &self,
        client_id: UserId,
        peer: Option<SocketAddr>,
        sink: W,
    ) -> Arc<ClientSession>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let config = self.inner.config;
        let session_id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = DeliveryQueue::bounded(client_id, config.queue_capacity);
        let session = Arc::new(ClientSession::new(
            client_id,
            session_id,
            peer,
            queue,
            config.overflow,
        ));

        let previous = {
            let mut sessions = self.inner.sessions.write();
            let previous = sessions.remove(&client_id);
            if let Some(old) = &previous {
                old.close();
            }
            sessions.insert(client_id, Arc::clone(&session));
            previous
        };

        self.inner.stats.client_registered();
        if let Some(old) = previous {
            self.inner.stats.client_superseded();
            tracing::info!(
                client_id,
                old_session = old.session_id(),
                new_session = session_id,
                "client reconnected, previous session closed"
            );
        } else {
            tracing::debug!(client_id, session_id, "client registered");
        }

        let writer = Writer::new(
            client_id,
            rx,
            sink,
            session.closed_token(),
            session.drain_token(),
        );
        let registry = self.clone();
        let owned = Arc::clone(&session);
        tokio::spawn(async move {
            let exit = writer.run().await;
            registry.remove_session(&owned);
            owned.close();
            match exit {
                WriterExit::Failed(e) => {
                    tracing::debug!(client_id, error = %e, "client writer stopped on error")
                }
                exit => tracing::debug!(client_id, ?exit, "client writer stopped"),
            }
        });

        session
    }

    /// Remove and close the session for `client_id`
    pub fn unregister(&self, client_id: UserId) -> Option<Arc<ClientSession>> {
        let mut sessions = self.inner.sessions.write();
        let session = sessions.remove(&client_id)?;
        session.close();
        Some(session)
    }

    /// Remove `session` only if it is still the current session for its id.
    ///
    /// Returns `false` when it was already replaced or removed.
    pub fn remove_session(&self, session: &ClientSession) -> bool {
        let mut sessions = self.inner.sessions.write();
        let is_current = sessions
            .get(&session.client_id())
            .is_some_and(|s| s.session_id() == session.session_id());
        if is_current {
            sessions.remove(&session.client_id());
        }
        session.close();
        is_current
    }

    /// Disconnect a session whose queue overflowed
    pub fn evict(&self, session: &ClientSession) {
        {
            let mut sessions = self.inner.sessions.write();
            if sessions
                .get(&session.client_id())
                .is_some_and(|s| s.session_id() == session.session_id())
            {
                sessions.remove(&session.client_id());
            }
            session.terminate_on_overflow();
        }
        self.inner.stats.client_evicted();
        tracing::warn!(
            client_id = session.client_id(),
            session_id = session.session_id(),
            peer = ?session.peer(),
            queued = session.queued(),
            overflow = ?self.inner.config.overflow,
            "client delivery queue full, disconnecting"
        );
    }

    /// Live session for `client_id`
    pub fn lookup(&self, client_id: UserId) -> Option<Arc<ClientSession>> {
        self.inner
            .sessions
            .read()
            .get(&client_id)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Snapshot of all live sessions
    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.inner
            .sessions
            .read()
            .values()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Check if no client is connected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session (shutdown)
    pub fn close_all(&self) -> usize {
        let sessions: Vec<_> = self.inner.sessions.write().drain().collect();
        for (_, session) in &sessions {
            session.close();
        }
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    use super::*;
    use crate::error::DeliveryError;

    fn registry(queue_capacity: usize, overflow: QueueOverflowAction) -> ClientRegistry {
        ClientRegistry::new(
            RegistryConfig {
                queue_capacity,
                overflow,
            },
            Arc::new(Stats::new()),
        )
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let registry = registry(8, QueueOverflowAction::Disconnect);
        let (_client, server) = tokio::io::duplex(64);

        let session = registry.register(42, None, server);
        assert_eq!(session.client_id(), 42);
        assert!(session.connected_at() > 0);

        let found = registry.lookup(42).unwrap();
        assert_eq!(found.session_id(), session.session_id());
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister(42).unwrap();
        assert!(removed.is_closed());
        assert!(registry.lookup(42).is_none());
        assert!(registry.is_empty());
        assert!(registry.unregister(42).is_none());
    }

    #[tokio::test]
    async fn test_delivers_to_connection() {
        let registry = registry(8, QueueOverflowAction::Disconnect);
        let (client, server) = tokio::io::duplex(64);

        let session = registry.register(1, None, server);
        session.enqueue(Arc::from("3|P|2|1")).unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "3|P|2|1");
    }

    #[tokio::test]
    async fn test_reregister_supersedes_previous() {
        let registry = registry(8, QueueOverflowAction::Disconnect);
        let (mut old_client, old_server) = tokio::io::duplex(64);
        let (_new_client, new_server) = tokio::io::duplex(64);

        let old = registry.register(5, None, old_server);
        let new = registry.register(5, None, new_server);

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(old.enqueue(Arc::from("1|B")).is_err());
        assert_eq!(registry.lookup(5).unwrap().session_id(), new.session_id());
        assert_eq!(registry.len(), 1);

        // Old connection is released by its writer
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(1), old_client.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_stale_remove_keeps_successor() {
        let registry = registry(8, QueueOverflowAction::Disconnect);
        let (_a, server_a) = tokio::io::duplex(64);
        let (_b, server_b) = tokio::io::duplex(64);

        let old = registry.register(9, None, server_a);
        let new = registry.register(9, None, server_b);

        assert!(!registry.remove_session(&old));
        assert_eq!(registry.lookup(9).unwrap().session_id(), new.session_id());
    }

    #[tokio::test]
    async fn test_evict_removes_session() {
        let stats = Arc::new(Stats::new());
        let registry = ClientRegistry::new(
            RegistryConfig {
                queue_capacity: 1,
                overflow: QueueOverflowAction::Disconnect,
            },
            Arc::clone(&stats),
        );
        let (_client, server) = tokio::io::duplex(64);

        let session = registry.register(2, None, server);
        registry.evict(&session);

        assert!(session.is_closed());
        assert!(registry.lookup(2).is_none());
        assert_eq!(stats.snapshot().clients_evicted, 1);
    }

    #[tokio::test]
    async fn test_sessions_snapshot_and_close_all() {
        let registry = registry(8, QueueOverflowAction::Disconnect);
        let mut clients = Vec::new();
        for id in 1..=3 {
            let (client, server) = tokio::io::duplex(64);
            clients.push(client);
            registry.register(id, None, server);
        }

        let mut ids: Vec<_> = registry.sessions().iter().map(|s| s.client_id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(registry.close_all(), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_evict_drains_queue_before_disconnect() {
        let stats = Arc::new(Stats::new());
        let registry = ClientRegistry::new(
            RegistryConfig {
                queue_capacity: 2,
                overflow: QueueOverflowAction::DrainThenDisconnect,
            },
            Arc::clone(&stats),
        );
        let (client, server) = tokio::io::duplex(64);

        let session = registry.register(4, None, server);
        session.enqueue(Arc::from("1|B")).unwrap();
        session.enqueue(Arc::from("2|B")).unwrap();
        assert_eq!(
            session.enqueue(Arc::from("3|B")).unwrap_err(),
            DeliveryError::QueueFull { client_id: 4 }
        );

        registry.evict(&session);
        assert!(registry.lookup(4).is_none());
        assert_eq!(
            session.enqueue(Arc::from("4|B")).unwrap_err(),
            DeliveryError::Closed { client_id: 4 }
        );

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "1|B");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "2|B");
        let eof = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eof, None);
        assert_eq!(stats.snapshot().clients_evicted, 1);
    }
}
