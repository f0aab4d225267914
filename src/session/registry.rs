use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::{ConnectionId, ConnectionSession, PresenceState, RegistryStats, RoomInfo, RoomKey};

/// Result of placing a connection into a room
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The session as stored after the upsert
    pub session: ConnectionSession,
    /// Room the connection was moved out of, if any
    pub left: Option<RoomKey>,
    /// The connection was already in the target room
    pub refreshed: bool,
    /// Members of the target room before this connection, excluding itself
    pub occupants: Vec<ConnectionSession>,
}

/// Tracks every live connection and the room it occupies.
///
/// Room membership for a given room is only mutated while holding that room's
/// index entry, and the lock order is always `rooms` then `sessions`. No guard
/// is held across an `.await`; the registry has no async methods at all.
pub struct SessionRegistry {
    /// connection_id -> session
    sessions: DashMap<ConnectionId, ConnectionSession>,
    /// room -> Set<connection_id>, present only while non-empty
    rooms: DashMap<RoomKey, HashSet<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Record a freshly connected session that has not joined a room
    pub fn open(&self, connection_id: ConnectionId, identity: Option<String>) -> ConnectionSession {
        let session = ConnectionSession::new(connection_id, identity);
        self.sessions.insert(connection_id, session.clone());

        tracing::debug!(
            connection_id = %connection_id,
            identity = ?session.identity,
            "Session opened"
        );

        session
    }

    /// Place a connection in `room`, replacing whatever entry it had.
    ///
    /// A move detaches the previous room before the new room is touched. A
    /// re-join of the current room only merges `state`. The occupant snapshot
    /// is taken under the same room guard as the insertion.
    ///
    /// Returns `None` when the connection is not registered, including when
    /// [`remove`](Self::remove) wins a race against this call. A removed
    /// session is never brought back.
    pub fn upsert(
        &self,
        connection_id: ConnectionId,
        room: RoomKey,
        identity: Option<String>,
        state: PresenceState,
    ) -> Option<UpsertOutcome> {
        let mut session = self.get(connection_id)?;
        let previous_room = session.current_room.clone();
        let refreshed = previous_room.as_ref() == Some(&room);

        let left = match previous_room {
            Some(old) if old != room => {
                self.detach(&old, connection_id);
                Some(old)
            }
            _ => None,
        };

        if identity.is_some() {
            session.identity = identity;
        }
        if refreshed {
            session.state.merge(state);
        } else {
            // Position and avatar belong to the old room; the name does not
            let display_name = session.state.display_name.take();
            session.state = state;
            if session.state.display_name.is_none() {
                session.state.display_name = display_name;
            }
        }
        session.current_room = Some(room.clone());
        session.last_activity = Utc::now();

        let occupants = {
            let mut members = self.rooms.entry(room.clone()).or_default();
            let occupants: Vec<ConnectionSession> = members
                .iter()
                .filter(|id| **id != connection_id)
                .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
                .collect();

            // Only overwrite an entry that still exists
            let stored = match self.sessions.get_mut(&connection_id) {
                Some(mut entry) => {
                    *entry = session.clone();
                    true
                }
                None => false,
            };

            if stored {
                members.insert(connection_id);
                Some(occupants)
            } else {
                None
            }
        };

        let Some(occupants) = occupants else {
            self.rooms.remove_if(&room, |_, members| members.is_empty());
            tracing::debug!(
                connection_id = %connection_id,
                room = %room,
                "Session removed while joining, not placed"
            );
            return None;
        };

        tracing::debug!(
            connection_id = %connection_id,
            room = %room,
            left = ?left.as_ref().map(|r| r.to_string()),
            refreshed = refreshed,
            "Session placed in room"
        );

        Some(UpsertOutcome {
            session,
            left,
            refreshed,
            occupants,
        })
    }

    /// Get a session by connection ID
    pub fn get(&self, connection_id: ConnectionId) -> Option<ConnectionSession> {
        self.sessions.get(&connection_id).map(|s| s.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    /// Get all sessions currently in a room
    pub fn list_by_room(&self, room: &RoomKey) -> Vec<ConnectionSession> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the connection IDs in a room
    pub fn members(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Take a connection out of its room without ending the session.
    /// Returns the room it left.
    pub fn leave_room(&self, connection_id: ConnectionId) -> Option<RoomKey> {
        let room = self.sessions.get(&connection_id)?.current_room.clone()?;
        self.detach(&room, connection_id);

        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.current_room = None;
        }

        tracing::debug!(connection_id = %connection_id, room = %room, "Session left room");
        Some(room)
    }

    /// Remove a session entirely. Returns the removed session so the caller
    /// can announce its departure.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<ConnectionSession> {
        let (_, session) = self.sessions.remove(&connection_id)?;

        if let Some(ref room) = session.current_room {
            self.detach(room, connection_id);
        }

        tracing::debug!(
            connection_id = %connection_id,
            room = ?session.current_room.as_ref().map(|r| r.to_string()),
            "Session removed"
        );

        Some(session)
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Merge carried state into a session, returning the updated session
    pub fn update_state(
        &self,
        connection_id: ConnectionId,
        state: PresenceState,
    ) -> Option<ConnectionSession> {
        let mut session = self.sessions.get_mut(&connection_id)?;
        session.state.merge(state);
        session.last_activity = Utc::now();
        Some(session.clone())
    }

    /// Sessions that have been inactive for longer than `timeout`
    pub fn find_stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        // A timeout beyond chrono's range can never elapse
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let now = Utc::now();

        self.sessions
            .iter()
            .filter(|entry| now.signed_duration_since(entry.last_activity) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// All currently occupied rooms with their member counts
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .map(|entry| RoomInfo {
                room: entry.key().clone(),
                occupant_count: entry.value().len(),
            })
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> RegistryStats {
        let mut identities: HashMap<String, usize> = HashMap::new();
        let mut guests = 0;
        let mut in_rooms = 0;

        for entry in self.sessions.iter() {
            match entry.identity {
                Some(ref identity) => *identities.entry(identity.clone()).or_default() += 1,
                None => guests += 1,
            }
            if entry.current_room.is_some() {
                in_rooms += 1;
            }
        }

        RegistryStats {
            total_sessions: self.sessions.len(),
            guest_sessions: guests,
            unique_identities: identities.len(),
            sessions_in_rooms: in_rooms,
            active_rooms: self.rooms.len(),
        }
    }

    /// Drop every session and room (process shutdown)
    pub fn clear(&self) {
        self.rooms.clear();
        self.sessions.clear();
    }

    /// Remove a connection from a room's member set and drop the room once
    /// it is empty
    fn detach(&self, room: &RoomKey, connection_id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
