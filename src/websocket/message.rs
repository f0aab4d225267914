use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::ChatRecord;
use crate::session::{ConnectionId, Occupant, PresenceState, RoomKey, DEFAULT_SUBSPACE};

/// Longest accepted chat message, in characters
pub const MAX_CHAT_LENGTH: usize = 2000;

fn default_subspace() -> String {
    DEFAULT_SUBSPACE.to_string()
}

fn default_message_type() -> String {
    "text".to_string()
}

/// Current time in milliseconds since epoch, used for every `ts` field
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpaceRequest {
    pub space_type: String,
    pub space_id: String,
    #[serde(default = "default_subspace")]
    pub subspace: String,
    /// Self-declared name; authenticated identity comes from the handshake
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub avatar: Option<Value>,
}

impl JoinSpaceRequest {
    pub fn room(&self) -> RoomKey {
        RoomKey::new(&self.space_type, &self.space_id, &self.subspace)
    }

    pub fn presence(&self) -> PresenceState {
        PresenceState {
            display_name: self.identity.clone(),
            position: self.position.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRequest {
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdateRequest {
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub avatar: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateUpdateRequest {
    /// Everything the client sent, as one object
    pub fn entity_data(&self) -> Value {
        let mut data = self.extra.clone();
        if let Some(ref position) = self.position {
            data.insert("position".to_string(), position.clone());
        }
        if let Some(ref avatar) = self.avatar {
            data.insert("avatar".to_string(), avatar.clone());
        }
        Value::Object(data)
    }

    pub fn presence(&self) -> PresenceState {
        PresenceState {
            display_name: None,
            position: self.position.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySignalRequest {
    pub target_connection_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// Events sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinSpace(JoinSpaceRequest),
    LeaveSpace,
    ChatMessage(ChatMessageRequest),
    StateUpdate(StateUpdateRequest),
    RelayOffer(RelaySignalRequest),
    RelayAnswer(RelaySignalRequest),
    RelayCandidate(RelaySignalRequest),
    Ping,
}

impl ClientEvent {
    /// Wire name, used for metrics labels and logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinSpace(_) => "join-space",
            ClientEvent::LeaveSpace => "leave-space",
            ClientEvent::ChatMessage(_) => "chat-message",
            ClientEvent::StateUpdate(_) => "state-update",
            ClientEvent::RelayOffer(_) => "relay-offer",
            ClientEvent::RelayAnswer(_) => "relay-answer",
            ClientEvent::RelayCandidate(_) => "relay-candidate",
            ClientEvent::Ping => "ping",
        }
    }

    /// Split by owning component
    pub fn route(self) -> Routed {
        match self {
            ClientEvent::JoinSpace(request) => Routed::Join(request),
            ClientEvent::LeaveSpace => Routed::Leave,
            ClientEvent::ChatMessage(request) => Routed::Room(RoomEvent::ChatMessage(request)),
            ClientEvent::StateUpdate(request) => Routed::Room(RoomEvent::StateUpdate(request)),
            ClientEvent::RelayOffer(request) => {
                Routed::Room(RoomEvent::Relay(RelayKind::Offer, request))
            }
            ClientEvent::RelayAnswer(request) => {
                Routed::Room(RoomEvent::Relay(RelayKind::Answer, request))
            }
            ClientEvent::RelayCandidate(request) => {
                Routed::Room(RoomEvent::Relay(RelayKind::Candidate, request))
            }
            ClientEvent::Ping => Routed::Room(RoomEvent::Ping),
        }
    }
}

/// Membership changes go to the router, everything else to the dispatcher
#[derive(Debug, Clone)]
pub enum Routed {
    Join(JoinSpaceRequest),
    Leave,
    Room(RoomEvent),
}

/// Events the dispatcher handles for a registered session
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ChatMessage(ChatMessageRequest),
    StateUpdate(StateUpdateRequest),
    Relay(RelayKind, RelaySignalRequest),
    Ping,
}

/// Which signaling step a relay event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    Candidate,
}

impl RelayKind {
    pub fn wrap(self, signal: RelaySignal) -> ServerEvent {
        match self {
            RelayKind::Offer => ServerEvent::RelayOffer(signal),
            RelayKind::Answer => ServerEvent::RelayAnswer(signal),
            RelayKind::Candidate => ServerEvent::RelayCandidate(signal),
        }
    }
}

/// Point-to-point signaling payload, tagged with its sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySignal {
    pub connection_id: ConnectionId,
    pub identity: Option<String>,
    pub payload: Value,
}

/// Events sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected {
        connection_id: ConnectionId,
        identity: Option<String>,
    },
    SpaceJoined {
        #[serde(flatten)]
        room: RoomKey,
        occupants: Vec<Occupant>,
        ts: i64,
    },
    SpaceLeft {
        #[serde(flatten)]
        room: RoomKey,
        ts: i64,
    },
    UserJoined {
        connection_id: ConnectionId,
        identity: Option<String>,
        display_name: String,
        position: Option<Value>,
        avatar: Option<Value>,
        ts: i64,
    },
    UserLeft {
        connection_id: ConnectionId,
        identity: Option<String>,
        ts: i64,
    },
    ChatMessage {
        #[serde(flatten)]
        message: ChatRecord,
        display_name: String,
        ts: i64,
    },
    ChatError {
        error: String,
    },
    StateUpdate {
        connection_id: ConnectionId,
        identity: Option<String>,
        entity_data: Value,
        ts: i64,
    },
    RelayOffer(RelaySignal),
    RelayAnswer(RelaySignal),
    RelayCandidate(RelaySignal),
    RoomError {
        code: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
    Heartbeat,
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn room_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RoomError {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn chat_error(error: impl Into<String>) -> Self {
        Self::ChatError {
            error: error.into(),
        }
    }

    pub fn user_left(connection_id: ConnectionId, identity: Option<String>) -> Self {
        Self::UserLeft {
            connection_id,
            identity,
            ts: now_ms(),
        }
    }

    /// Wire name, used for metrics labels and logs
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::SpaceJoined { .. } => "space-joined",
            ServerEvent::SpaceLeft { .. } => "space-left",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::UserLeft { .. } => "user-left",
            ServerEvent::ChatMessage { .. } => "chat-message",
            ServerEvent::ChatError { .. } => "chat-error",
            ServerEvent::StateUpdate { .. } => "state-update",
            ServerEvent::RelayOffer(_) => "relay-offer",
            ServerEvent::RelayAnswer(_) => "relay-answer",
            ServerEvent::RelayCandidate(_) => "relay-candidate",
            ServerEvent::RoomError { .. } => "room-error",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
            ServerEvent::Heartbeat => "heartbeat",
        }
    }
}

/// Message queued for a connection's writer task.
///
/// Room broadcasts serialize once and share the text across recipients.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerEvent),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialized(event: &ServerEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::Preserialized(Arc::from(serde_json::to_string(event)?)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(event) => serde_json::to_string(event),
            Self::Preserialized(text) => Ok(text.to_string()),
        }
    }
}
