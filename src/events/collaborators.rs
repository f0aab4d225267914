use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::session::{ConnectionId, ConnectionSession, RoomKey};

/// Messages kept per room by the in-memory store
const DEFAULT_HISTORY_PER_ROOM: usize = 200;

/// Rooms with history kept by the in-memory store
const DEFAULT_MAX_ROOMS: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Chat message accepted by validation, not yet persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDraft {
    pub room: RoomKey,
    pub connection_id: ConnectionId,
    pub identity: Option<String>,
    pub content: String,
    pub message_type: String,
    pub parent_id: Option<String>,
}

/// Canonical copy of a chat message, with the identifier the store assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    #[serde(flatten)]
    pub room: RoomKey,
    pub connection_id: ConnectionId,
    pub identity: Option<String>,
    pub content: String,
    pub message_type: String,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

/// Persists chat messages before they are shown to anyone
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(&self, draft: ChatDraft) -> Result<ChatRecord, CollaboratorError>;

    /// Most recent messages of a room, oldest first
    async fn recent(&self, room: &RoomKey, limit: usize) -> Result<Vec<ChatRecord>, CollaboratorError>;
}

/// Last-activity bookkeeping for sessions that publish state
#[async_trait]
pub trait ActivityTracker: Send + Sync {
    async fn record(
        &self,
        session: &ConnectionSession,
        entity_data: &Value,
    ) -> Result<(), CollaboratorError>;

    /// Called once a connection has closed
    async fn forget(&self, _connection_id: ConnectionId) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Bounded per-room history held in process memory.
///
/// Once `max_rooms` rooms have history, a message to a new room evicts the
/// room whose latest message is oldest.
pub struct InMemoryMessageStore {
    rooms: DashMap<RoomKey, VecDeque<ChatRecord>>,
    max_per_room: usize,
    max_rooms: usize,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_HISTORY_PER_ROOM, DEFAULT_MAX_ROOMS)
    }

    pub fn with_capacity(max_per_room: usize) -> Self {
        Self::with_limits(max_per_room, DEFAULT_MAX_ROOMS)
    }

    pub fn with_limits(max_per_room: usize, max_rooms: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_per_room: max_per_room.max(1),
            max_rooms: max_rooms.max(1),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn evict_stalest_room(&self) {
        let stalest = self
            .rooms
            .iter()
            .min_by_key(|entry| entry.value().back().map(|r| r.created_at).unwrap_or(i64::MIN))
            .map(|entry| entry.key().clone());

        if let Some(room) = stalest {
            self.rooms.remove(&room);
            tracing::debug!(room = %room, "Evicted chat history");
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(&self, draft: ChatDraft) -> Result<ChatRecord, CollaboratorError> {
        let record = ChatRecord {
            id: Uuid::new_v4().to_string(),
            room: draft.room,
            connection_id: draft.connection_id,
            identity: draft.identity,
            content: draft.content,
            message_type: draft.message_type,
            parent_id: draft.parent_id,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        if !self.rooms.contains_key(&record.room) && self.rooms.len() >= self.max_rooms {
            self.evict_stalest_room();
        }

        let mut history = self.rooms.entry(record.room.clone()).or_default();
        if history.len() >= self.max_per_room {
            history.pop_front();
        }
        history.push_back(record.clone());

        Ok(record)
    }

    async fn recent(&self, room: &RoomKey, limit: usize) -> Result<Vec<ChatRecord>, CollaboratorError> {
        Ok(self
            .rooms
            .get(room)
            .map(|history| {
                let skip = history.len().saturating_sub(limit);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }
}

/// Keeps the last published entity state per connection
#[derive(Default)]
pub struct InMemoryActivityTracker {
    last_seen: DashMap<ConnectionId, (i64, Value)>,
}

impl InMemoryActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp (ms) and entity data of the last recorded update
    pub fn last_seen(&self, connection_id: ConnectionId) -> Option<(i64, Value)> {
        self.last_seen.get(&connection_id).map(|e| e.clone())
    }
}

#[async_trait]
impl ActivityTracker for InMemoryActivityTracker {
    async fn record(
        &self,
        session: &ConnectionSession,
        entity_data: &Value,
    ) -> Result<(), CollaboratorError> {
        self.last_seen.insert(
            session.connection_id,
            (chrono::Utc::now().timestamp_millis(), entity_data.clone()),
        );
        Ok(())
    }

    async fn forget(&self, connection_id: ConnectionId) -> Result<(), CollaboratorError> {
        self.last_seen.remove(&connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(room: &RoomKey, content: &str) -> ChatDraft {
        ChatDraft {
            room: room.clone(),
            connection_id: Uuid::new_v4(),
            identity: Some("alice".into()),
            content: content.to_string(),
            message_type: "text".into(),
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn test_persist_assigns_id() {
        let store = InMemoryMessageStore::new();
        let room = RoomKey::new("post", "1", "main");

        let record = store.persist(draft(&room, "hi")).await.unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.content, "hi");
        assert_eq!(record.room, room);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = InMemoryMessageStore::with_capacity(2);
        let room = RoomKey::new("post", "1", "main");

        for content in ["one", "two", "three"] {
            store.persist(draft(&room, content)).await.unwrap();
        }

        let recent = store.recent(&room, 10).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);

        let last = store.recent(&room, 1).await.unwrap();
        assert_eq!(last[0].content, "three");
    }

    #[tokio::test]
    async fn test_room_count_is_bounded() {
        let store = InMemoryMessageStore::with_limits(10, 2);

        for id in ["1", "2", "3"] {
            store.persist(draft(&RoomKey::new("post", id, "main"), "hi")).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(store.room_count(), 2);
        // Least recently written room went first
        assert!(store.recent(&RoomKey::new("post", "1", "main"), 10).await.unwrap().is_empty());
        assert_eq!(store.recent(&RoomKey::new("post", "3", "main"), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tracker_records_entity() {
        let tracker = InMemoryActivityTracker::new();
        let session = ConnectionSession::new(Uuid::new_v4(), None);

        tracker
            .record(&session, &serde_json::json!({"position": [1, 2]}))
            .await
            .unwrap();

        let (_, data) = tracker.last_seen(session.connection_id).unwrap();
        assert_eq!(data["position"], serde_json::json!([1, 2]));
    }
}
