//! Follower Maze Notification Server
//!
//! A real-time social-graph notification server. One event source streams
//! sequence-numbered events (follow, unfollow, broadcast, private message,
//! status update) that may arrive out of order; every connected client
//! receives exactly the notifications meant for it, in sequence order.
//!
//! # Features
//!
//! - **Reorder Buffer**: restores strict sequence order, bounded in memory
//!   and in how long it waits for a missing id
//! - **Single Serialization Point**: graph mutation and recipient resolution
//!   run on one task, so the follower graph needs no per-edge locking
//! - **Backpressure**: bounded per-client queues; a client that falls behind
//!   is disconnected instead of silently losing messages
//! - **Last Connection Wins**: reconnecting with the same id closes the old
//!   session first
//!
//! # Modules
//!
//! - `types`: Event model and event-line parser
//! - `graph`: Follower graph
//! - `registry`: Client registry and sessions
//! - `delivery`: Per-client bounded queue and writer task
//! - `reorder`: Reorder buffer
//! - `dispatch`: Dispatcher and sequencer task
//! - `server`: TCP listeners and connection handlers
//! - `api`: Admin HTTP endpoints
//! - `config`: Configuration from environment variables
//! - `stats`: Runtime counters
//!
//! # Example
//!
//! ```no_run
//! use follower_maze::{NotificationServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> follower_maze::ServerResult<()> {
//!     let server = NotificationServer::bind(ServerConfig::from_env()?).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod registry;
pub mod reorder;
pub mod server;
pub mod stats;
pub mod types;

// Re-export commonly used items at crate root
pub use config::ServerConfig;
pub use dispatch::{DispatchOutcome, Dispatcher, Sequencer};
pub use error::{ConfigError, DeliveryError, DispatchError, ParseError, ReorderError, ServerError};
pub use graph::FollowerGraph;
pub use registry::{ClientRegistry, ClientSession};
pub use reorder::{OverflowAction, ReorderBuffer, ReorderConfig};
pub use server::NotificationServer;
pub use stats::{Stats, StatsSnapshot};
pub use types::{Event, EventKind, EventType, SequenceId, ServerResult, UserId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
