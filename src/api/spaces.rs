//! Read-only views of room occupancy and history.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::events::ChatRecord;
use crate::server::AppState;
use crate::session::{Occupant, RoomInfo, RoomKey, DEFAULT_SUBSPACE};

/// Upper bound for `limit` on the history endpoint
const MAX_HISTORY_LIMIT: usize = 100;

fn default_subspace() -> String {
    DEFAULT_SUBSPACE.to_string()
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct SubspaceQuery {
    #[serde(default = "default_subspace")]
    pub subspace: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_subspace")]
    pub subspace: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct SpaceListResponse {
    pub spaces: Vec<RoomInfo>,
    pub total_spaces: usize,
}

#[derive(Debug, Serialize)]
pub struct OccupantsResponse {
    #[serde(flatten)]
    pub room: RoomKey,
    pub occupants: Vec<Occupant>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    #[serde(flatten)]
    pub room: RoomKey,
    pub messages: Vec<ChatRecord>,
}

/// GET /api/v1/spaces - Occupied rooms with member counts
pub async fn list_spaces(State(state): State<AppState>) -> Json<SpaceListResponse> {
    let spaces = state.registry.list_rooms();
    let total = spaces.len();

    Json(SpaceListResponse {
        spaces,
        total_spaces: total,
    })
}

/// GET /api/v1/spaces/{space_type}/{space_id}/occupants - Current occupants.
/// An unoccupied room yields an empty list.
pub async fn space_occupants(
    State(state): State<AppState>,
    Path((space_type, space_id)): Path<(String, String)>,
    Query(query): Query<SubspaceQuery>,
) -> Json<OccupantsResponse> {
    let room = RoomKey::new(space_type, space_id, query.subspace);
    let occupants: Vec<Occupant> = state
        .registry
        .list_by_room(&room)
        .iter()
        .map(Occupant::from)
        .collect();
    let count = occupants.len();

    Json(OccupantsResponse {
        room,
        occupants,
        count,
    })
}

/// GET /api/v1/spaces/{space_type}/{space_id}/messages - Recent chat history,
/// oldest first
pub async fn recent_messages(
    State(state): State<AppState>,
    Path((space_type, space_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    if query.limit == 0 || query.limit > MAX_HISTORY_LIMIT {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }

    let room = RoomKey::new(space_type, space_id, query.subspace);
    let messages = match tokio::time::timeout(
        state.collaborators.timeout,
        state.collaborators.store.recent(&room, query.limit),
    )
    .await
    {
        Ok(Ok(messages)) => messages,
        Ok(Err(e)) => return Err(AppError::Internal(e.to_string())),
        Err(_) => return Err(AppError::Internal("message store timed out".to_string())),
    };

    Ok(Json(HistoryResponse { room, messages }))
}
