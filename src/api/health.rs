//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::room::DeliveryStatsSnapshot;
use crate::server::AppState;
use crate::session::RegistryStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
    pub rooms: usize,
    pub relay_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sessions: RegistryStats,
    pub delivery: DeliveryStatsSnapshot,
    pub open_connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.router.connection_count(),
        rooms: state.registry.room_count(),
        relay_configured: state.credential_issuer.is_configured(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        sessions: state.registry.stats(),
        delivery: state.router.stats(),
        open_connections: state.router.connection_count(),
    })
}
