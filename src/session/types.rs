//! Connection session and room key types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier of one live connection
pub type ConnectionId = Uuid;

/// Subspace used when a join request does not name one
pub const DEFAULT_SUBSPACE: &str = "main";

/// Composite key of a logical room. Space types are interpreted by the
/// access collaborator only; here the key is an opaque triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomKey {
    pub space_type: String,
    pub space_id: String,
    pub subspace: String,
}

impl RoomKey {
    pub fn new(
        space_type: impl Into<String>,
        space_id: impl Into<String>,
        subspace: impl Into<String>,
    ) -> Self {
        Self {
            space_type: space_type.into(),
            space_id: space_id.into(),
            subspace: subspace.into(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.space_type, self.space_id, self.subspace)
    }
}

/// State a client carries into a room (avatar, position, name)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Value>,
}

impl PresenceState {
    /// Overwrite the fields `update` carries, keep the rest
    pub fn merge(&mut self, update: PresenceState) {
        if update.display_name.is_some() {
            self.display_name = update.display_name;
        }
        if update.position.is_some() {
            self.position = update.position;
        }
        if update.avatar.is_some() {
            self.avatar = update.avatar;
        }
    }
}

/// One live connection and its membership
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    /// Authenticated principal; `None` is a guest
    pub identity: Option<String>,
    pub current_room: Option<RoomKey>,
    pub state: PresenceState,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConnectionSession {
    pub fn new(connection_id: ConnectionId, identity: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            identity,
            current_room: None,
            state: PresenceState::default(),
            connected_at: now,
            last_activity: now,
        }
    }

    /// Name shown to other room members
    pub fn display_name(&self) -> String {
        self.state
            .display_name
            .clone()
            .or_else(|| self.identity.clone())
            .unwrap_or_else(|| {
                let id = self.connection_id.simple().to_string();
                format!("guest-{}", &id[..8])
            })
    }
}

/// Public view of a room member, as sent in occupant lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occupant {
    pub connection_id: ConnectionId,
    pub identity: Option<String>,
    pub display_name: String,
    pub position: Option<Value>,
    pub avatar: Option<Value>,
    pub last_activity: i64,
}

impl From<&ConnectionSession> for Occupant {
    fn from(session: &ConnectionSession) -> Self {
        Self {
            connection_id: session.connection_id,
            identity: session.identity.clone(),
            display_name: session.display_name(),
            position: session.state.position.clone(),
            avatar: session.state.avatar.clone(),
            last_activity: session.last_activity.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_room_key_display() {
        let room = RoomKey::new("post", "42", DEFAULT_SUBSPACE);
        assert_eq!(room.to_string(), "post:42/main");
    }

    #[test]
    fn test_presence_merge_keeps_missing_fields() {
        let mut state = PresenceState {
            display_name: Some("alice".into()),
            position: Some(json!({"x": 1})),
            avatar: Some(json!("fox")),
        };
        state.merge(PresenceState {
            position: Some(json!({"x": 2})),
            ..Default::default()
        });

        assert_eq!(state.display_name.as_deref(), Some("alice"));
        assert_eq!(state.position, Some(json!({"x": 2})));
        assert_eq!(state.avatar, Some(json!("fox")));
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut session = ConnectionSession::new(Uuid::new_v4(), None);
        assert!(session.display_name().starts_with("guest-"));
        assert_eq!(session.display_name().len(), "guest-".len() + 8);

        session.identity = Some("0xabc".into());
        assert_eq!(session.display_name(), "0xabc");

        session.state.display_name = Some("Alice".into());
        assert_eq!(session.display_name(), "Alice");
    }
}
