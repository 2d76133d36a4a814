//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use super::AdminState;
use crate::dispatch::ProgressSnapshot;
use crate::stats::StatsSnapshot;
use crate::types::UserId;

/// Response for GET /api/stats
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub counters: StatsSnapshot,
    pub sequencer: ProgressSnapshot,
    pub sessions: usize,
    pub edges: usize,
}

/// Response for GET /api/users/:id/followers
#[derive(Debug, Serialize)]
pub struct FollowersResponse {
    pub user: UserId,
    pub online: bool,
    pub followers: Vec<UserId>,
    pub following: Vec<UserId>,
}

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AdminState>) -> Router {
    // Read-only endpoints, so any origin may poll them
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/api/users/:id/followers", get(get_followers))
        .layer(cors)
        .with_state(state)
}

/// Serve the admin API until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "admin API listening");

    axum::serve(listener, create_router(Arc::new(state)))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/stats - counters and reorder progress
async fn get_stats(State(state): State<Arc<AdminState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        counters: state.stats.snapshot(),
        sequencer: state.progress.snapshot(),
        sessions: state.registry.len(),
        edges: state.graph.read().edge_count(),
    })
}

/// GET /api/users/:id/followers - follow relationships of one user
async fn get_followers(
    State(state): State<Arc<AdminState>>,
    Path(user): Path<UserId>,
) -> Json<FollowersResponse> {
    let (mut followers, mut following) = {
        let graph = state.graph.read();
        (graph.followers_of(user), graph.following_of(user))
    };
    followers.sort_unstable();
    following.sort_unstable();

    Json(FollowersResponse {
        user,
        online: state.registry.lookup(user).is_some(),
        followers,
        following,
    })
}
