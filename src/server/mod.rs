//! Notification server
//!
//! Binds the event-source and client listeners, runs the sequencer, and
//! hands accepted connections to their handlers through a bounded queue.
//!
//! ```text
//! event sources ──► EventSourceHandler ──► ingest queue ──► Sequencer
//!                                                             │ reorder
//!                                                             ▼ dispatch
//! clients ──► ClientHandler ──► ClientRegistry ◄──────────────┘
//!                                    │
//!                                    ▼
//!                          per-session queue ──► Writer ──► socket
//! ```
//!
//! One `CancellationToken` stops everything: accept loops, the hand-off,
//! every connection's read/write, and the sequencer.

mod handlers;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AdminState};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Ingest, Sequencer, SequencerProgress, SharedGraph};
use crate::error::ServerError;
use crate::registry::ClientRegistry;
use crate::stats::Stats;

use handlers::{ClientHandler, EventSourceHandler};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionKind {
    EventSource,
    Client,
}

impl ConnectionKind {
    fn name(&self) -> &'static str {
        match self {
            ConnectionKind::EventSource => "event source",
            ConnectionKind::Client => "client",
        }
    }
}

/// A connection waiting for its handler
struct Accepted {
    kind: ConnectionKind,
    stream: TcpStream,
    peer: SocketAddr,
}

/// Bound, not yet running, notification server
pub struct NotificationServer {
    config: ServerConfig,
    event_listener: TcpListener,
    client_listener: TcpListener,
    admin_listener: Option<TcpListener>,
    registry: ClientRegistry,
    stats: Arc<Stats>,
    sequencer: Sequencer,
}

impl NotificationServer {
    /// Bind every listener. Failure here is the only fatal error.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let event_listener = bind_listener("event source", &config.event_addr).await?;
        let client_listener = bind_listener("client", &config.client_addr).await?;
        let admin_listener = match &config.admin_addr {
            Some(addr) => Some(bind_listener("admin", addr).await?),
            None => None,
        };

        let stats = Arc::new(Stats::new());
        let registry = ClientRegistry::new(config.registry, Arc::clone(&stats));
        let dispatcher = Dispatcher::new(registry.clone(), Arc::clone(&stats));
        let sequencer = Sequencer::new(config.reorder, dispatcher, Arc::clone(&stats));

        Ok(Self {
            config,
            event_listener,
            client_listener,
            admin_listener,
            registry,
            stats,
            sequencer,
        })
    }

    pub fn event_addr(&self) -> io::Result<SocketAddr> {
        self.event_listener.local_addr()
    }

    pub fn client_addr(&self) -> io::Result<SocketAddr> {
        self.client_listener.local_addr()
    }

    pub fn admin_addr(&self) -> Option<io::Result<SocketAddr>> {
        self.admin_listener.as_ref().map(TcpListener::local_addr)
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> ClientRegistry {
        self.registry.clone()
    }

    pub fn graph(&self) -> SharedGraph {
        self.sequencer.dispatcher().graph()
    }

    pub fn progress(&self) -> Arc<SequencerProgress> {
        self.sequencer.progress()
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let Self {
            config,
            event_listener,
            client_listener,
            admin_listener,
            registry,
            stats,
            sequencer,
        } = self;

        tracing::info!(
            event_addr = %event_listener.local_addr()?,
            client_addr = %client_listener.local_addr()?,
            reorder_capacity = config.reorder.capacity,
            client_queue_capacity = config.registry.queue_capacity,
            "notification server listening"
        );

        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue);
        let admin_state = AdminState {
            stats: Arc::clone(&stats),
            progress: sequencer.progress(),
            registry: registry.clone(),
            graph: sequencer.dispatcher().graph(),
        };
        let sequencer_task = tokio::spawn(sequencer.run(ingest_rx, shutdown.clone()));

        let admin_task = admin_listener.map(|listener| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = api::serve(listener, admin_state, shutdown).await {
                    tracing::warn!(error = %e, "admin API stopped");
                }
            })
        });

        let (conn_tx, mut conn_rx) = mpsc::channel(config.connection_queue);
        let accept_tasks = [
            tokio::spawn(accept_loop(
                ConnectionKind::EventSource,
                event_listener,
                conn_tx.clone(),
                shutdown.clone(),
            )),
            tokio::spawn(accept_loop(
                ConnectionKind::Client,
                client_listener,
                conn_tx,
                shutdown.clone(),
            )),
        ];

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = conn_rx.recv() => match accepted {
                    Some(accepted) => accepted,
                    None => break,
                },
            };
            spawn_handler(accepted, &config, &registry, &ingest_tx, &stats, &shutdown);
        }

        for task in accept_tasks {
            let _ = task.await;
        }
        drop(ingest_tx);
        let closed = registry.close_all();
        let _ = sequencer_task.await;
        if let Some(task) = admin_task {
            let _ = task.await;
        }

        tracing::info!(
            sessions_closed = closed,
            stats = ?stats.snapshot(),
            "notification server stopped"
        );
        Ok(())
    }
}

async fn bind_listener(name: &'static str, address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            name,
            address: address.to_string(),
            source,
        })
}

/// Accept connections and queue them for the hand-off loop
async fn accept_loop(
    kind: ConnectionKind,
    listener: TcpListener,
    conn_tx: mpsc::Sender<Accepted>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let accepted = Accepted { kind, stream, peer };
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = conn_tx.send(accepted) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(listener = kind.name(), error = %e, "accept error");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    tracing::debug!(listener = kind.name(), "accept loop stopped");
}

fn spawn_handler(
    accepted: Accepted,
    config: &ServerConfig,
    registry: &ClientRegistry,
    ingest_tx: &mpsc::Sender<Ingest>,
    stats: &Arc<Stats>,
    shutdown: &CancellationToken,
) {
    let Accepted { kind, stream, peer } = accepted;
    let shutdown = shutdown.clone();

    match kind {
        ConnectionKind::EventSource => {
            let handler = EventSourceHandler {
                peer,
                ingest: ingest_tx.clone(),
                stats: Arc::clone(stats),
                max_line_length: config.max_line_length,
            };
            tokio::spawn(async move {
                if let Err(e) = handler.handle(stream, shutdown).await {
                    tracing::debug!(peer = %peer, error = %e, "event source connection error");
                }
            });
        }
        ConnectionKind::Client => {
            let handler = ClientHandler {
                peer,
                registry: registry.clone(),
                handshake_timeout: config.handshake_timeout,
                max_line_length: config.max_line_length,
            };
            tokio::spawn(async move {
                if let Err(e) = handler.handle(stream, shutdown).await {
                    tracing::debug!(peer = %peer, error = %e, "client connection error");
                }
            });
        }
    }
}
