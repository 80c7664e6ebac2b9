//! HTTP surface for the standalone indexer.
//!
//! Exposes liveness and the bridge's projection counters so operators can
//! watch catch-up and live progress without tailing logs.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use palisade_backend::bridge::{BridgeStats, BridgeStatsSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub last_block: u64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: BridgeStatsSnapshot,
}

async fn health(State(stats): State<Arc<BridgeStats>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        last_block: stats.snapshot().last_block,
    })
}

async fn bridge_stats(State(stats): State<Arc<BridgeStats>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: stats.snapshot(),
    })
}

/// Build the axum router with CORS enabled.
pub fn build_router(stats: Arc<BridgeStats>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(bridge_stats))
        .layer(cors)
        .with_state(stats)
}
