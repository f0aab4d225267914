use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::relay::relay_credentials;
use super::spaces::{list_spaces, recent_messages, space_occupants};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/relay/credentials", get(relay_credentials))
                .route("/spaces", get(list_spaces))
                .route(
                    "/spaces/{space_type}/{space_id}/occupants",
                    get(space_occupants),
                )
                .route(
                    "/spaces/{space_type}/{space_id}/messages",
                    get(recent_messages),
                ),
        )
}
