//! Admin HTTP API
//!
//! Read-only view of the running server: health, counters, reorder progress,
//! and follow relationships. Disabled unless an admin address is configured.

pub mod http;

use std::sync::Arc;

use crate::dispatch::{SequencerProgress, SharedGraph};
use crate::registry::ClientRegistry;
use crate::stats::Stats;

pub use http::{create_router, serve};

/// Shared state for admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub stats: Arc<Stats>,
    pub progress: Arc<SequencerProgress>,
    pub registry: ClientRegistry,
    pub graph: SharedGraph,
}
