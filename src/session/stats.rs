//! Registry statistics and room info structures

use serde::Serialize;

use super::RoomKey;

/// Registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub guest_sessions: usize,
    pub unique_identities: usize,
    pub sessions_in_rooms: usize,
    pub active_rooms: usize,
}

/// Room occupancy information
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    #[serde(flatten)]
    pub room: RoomKey,
    pub occupant_count: usize,
}
