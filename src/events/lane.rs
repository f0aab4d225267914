use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::room::{Emission, RoomRouter};
use crate::session::{ConnectionId, ConnectionSession};
use crate::websocket::{now_ms, ServerEvent};

use super::{ActivityTracker, ChatDraft, MessageStore};

/// Collaborator work that must not stall the socket's receive loop
#[derive(Debug)]
pub enum DeferredJob {
    /// Persist a validated chat message, then broadcast the stored copy
    PersistChat {
        draft: ChatDraft,
        display_name: String,
    },
    /// Record that a session published entity state
    RecordActivity {
        session: ConnectionSession,
        entity_data: Value,
    },
}

impl DeferredJob {
    pub fn name(&self) -> &'static str {
        match self {
            DeferredJob::PersistChat { .. } => "persist_chat",
            DeferredJob::RecordActivity { .. } => "record_activity",
        }
    }

    /// What the sender hears when this job could not be queued. Activity
    /// bookkeeping is dropped quietly.
    pub fn rejection(&self) -> Option<Emission> {
        match self {
            DeferredJob::PersistChat { draft, .. } => Some(Emission::to(
                draft.connection_id,
                ServerEvent::chat_error("Too many messages in flight, try again shortly"),
            )),
            DeferredJob::RecordActivity { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("deferred lane is full")]
    Busy(DeferredJob),
    #[error("deferred lane is closed")]
    Closed(DeferredJob),
}

impl SubmitError {
    pub fn into_job(self) -> DeferredJob {
        match self {
            SubmitError::Busy(job) | SubmitError::Closed(job) => job,
        }
    }
}

/// External collaborators, each call bounded by `timeout`
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MessageStore>,
    pub tracker: Arc<dyn ActivityTracker>,
    pub timeout: Duration,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn MessageStore>,
        tracker: Arc<dyn ActivityTracker>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            timeout,
        }
    }

    /// Release per-connection state held by the tracker
    pub async fn forget(&self, connection_id: ConnectionId) {
        match timeout(self.timeout, self.tracker.forget(connection_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Activity not released");
            }
            Err(_) => {
                tracing::debug!(connection_id = %connection_id, "Activity tracker timed out on release");
            }
        }
    }

    /// Run one job and return what it emits
    pub async fn execute(&self, job: DeferredJob) -> Vec<Emission> {
        match job {
            DeferredJob::PersistChat {
                draft,
                display_name,
            } => {
                let sender = draft.connection_id;
                let room = draft.room.clone();

                match timeout(self.timeout, self.store.persist(draft)).await {
                    Ok(Ok(record)) => vec![Emission::room(
                        room,
                        ServerEvent::ChatMessage {
                            message: record,
                            display_name,
                            ts: now_ms(),
                        },
                    )],
                    Ok(Err(e)) => {
                        tracing::warn!(connection_id = %sender, room = %room, error = %e, "Chat message not persisted");
                        vec![Emission::to(
                            sender,
                            ServerEvent::chat_error("Message could not be saved"),
                        )]
                    }
                    Err(_) => {
                        tracing::warn!(
                            connection_id = %sender,
                            room = %room,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Message store timed out"
                        );
                        vec![Emission::to(
                            sender,
                            ServerEvent::chat_error("Message could not be saved"),
                        )]
                    }
                }
            }
            DeferredJob::RecordActivity {
                session,
                entity_data,
            } => {
                match timeout(self.timeout, self.tracker.record(&session, &entity_data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %session.connection_id, error = %e, "Activity not recorded");
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %session.connection_id, "Activity tracker timed out");
                    }
                }
                Vec::new()
            }
        }
    }
}

/// Per-connection queue of deferred jobs.
///
/// Jobs run one at a time in submission order, so a connection's chat
/// messages reach the room in the order they were sent. The queue holds at
/// most `capacity` jobs. Dropping the lane closes the queue; jobs already
/// submitted still complete.
pub struct DeferredLane {
    tx: mpsc::Sender<DeferredJob>,
}

impl DeferredLane {
    pub fn spawn(
        router: Arc<RoomRouter>,
        collaborators: Collaborators,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DeferredJob>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let emissions = collaborators.execute(job).await;
                router.deliver(emissions);
            }
        });

        (Self { tx }, handle)
    }

    /// Queue a job without waiting. A full queue hands the job back.
    pub fn submit(&self, job: DeferredJob) -> Result<(), SubmitError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => SubmitError::Busy(job),
            TrySendError::Closed(job) => SubmitError::Closed(job),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollaboratorError, ChatRecord, InMemoryActivityTracker, InMemoryMessageStore};
    use crate::room::{DeliveryTarget, PolicyAccess};
    use crate::session::{RoomKey, SessionRegistry};
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn persist(&self, _draft: ChatDraft) -> Result<ChatRecord, CollaboratorError> {
            Err(CollaboratorError::Unavailable("down".into()))
        }

        async fn recent(&self, _room: &RoomKey, _limit: usize) -> Result<Vec<ChatRecord>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl MessageStore for SlowStore {
        async fn persist(&self, _draft: ChatDraft) -> Result<ChatRecord, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(CollaboratorError::Unavailable("unreachable".into()))
        }

        async fn recent(&self, _room: &RoomKey, _limit: usize) -> Result<Vec<ChatRecord>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    fn collaborators(store: Arc<dyn MessageStore>, timeout: Duration) -> Collaborators {
        Collaborators::new(store, Arc::new(InMemoryActivityTracker::new()), timeout)
    }

    fn job(content: &str) -> DeferredJob {
        DeferredJob::PersistChat {
            draft: ChatDraft {
                room: RoomKey::new("post", "1", "main"),
                connection_id: uuid::Uuid::new_v4(),
                identity: Some("alice".into()),
                content: content.to_string(),
                message_type: "text".into(),
                parent_id: None,
            },
            display_name: "Alice".into(),
        }
    }

    #[tokio::test]
    async fn test_persisted_chat_goes_to_whole_room() {
        let collaborators = collaborators(Arc::new(InMemoryMessageStore::new()), Duration::from_secs(1));

        let emissions = collaborators.execute(job("hello")).await;
        assert_eq!(emissions.len(), 1);
        assert!(matches!(
            emissions[0].target,
            DeliveryTarget::Room { exclude: None, .. }
        ));
        match &emissions[0].event {
            ServerEvent::ChatMessage { message, display_name, .. } => {
                assert_eq!(message.content, "hello");
                assert_eq!(display_name, "Alice");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_failure_reported_to_sender() {
        let collaborators = collaborators(Arc::new(FailingStore), Duration::from_secs(1));

        let emissions = collaborators.execute(job("hello")).await;
        assert_eq!(emissions.len(), 1);
        assert!(matches!(emissions[0].target, DeliveryTarget::Connection(_)));
        assert!(matches!(emissions[0].event, ServerEvent::ChatError { .. }));
    }

    #[tokio::test]
    async fn test_store_timeout_reported_to_sender() {
        let collaborators = collaborators(Arc::new(SlowStore), Duration::from_millis(50));

        let emissions = collaborators.execute(job("hello")).await;
        assert!(matches!(emissions[0].event, ServerEvent::ChatError { .. }));
    }

    #[tokio::test]
    async fn test_lane_preserves_order() {
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(RoomRouter::new(
            registry,
            Arc::new(PolicyAccess::open()),
            Duration::from_secs(1),
        ));
        let (tx, mut rx) = mpsc::channel(16);
        let handle = router.connect(None, tx);
        let room = RoomKey::new("post", "1", "main");
        router.registry().upsert(handle.id, room.clone(), None, Default::default());

        let store = Arc::new(InMemoryMessageStore::new());
        let (lane, worker) = DeferredLane::spawn(
            router.clone(),
            collaborators(store, Duration::from_secs(1)),
            8,
        );

        for content in ["first", "second", "third"] {
            assert!(lane.submit(DeferredJob::PersistChat {
                draft: ChatDraft {
                    room: room.clone(),
                    connection_id: handle.id,
                    identity: None,
                    content: content.to_string(),
                    message_type: "text".into(),
                    parent_id: None,
                },
                display_name: "guest".into(),
            })
            .is_ok());
        }
        drop(lane);
        worker.await.unwrap();

        let mut received = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
            received.push(json["data"]["content"].as_str().unwrap().to_string());
        }
        assert_eq!(received, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_full_lane_hands_job_back() {
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(RoomRouter::new(
            registry,
            Arc::new(PolicyAccess::open()),
            Duration::from_secs(1),
        ));
        let (lane, worker) = DeferredLane::spawn(
            router,
            collaborators(Arc::new(SlowStore), Duration::from_secs(10)),
            1,
        );

        // One job is taken by the worker, one waits in the queue
        let mut accepted = 0;
        let mut busy = None;
        for _ in 0..3 {
            match lane.submit(job("flood")) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    assert!(matches!(e, SubmitError::Busy(_)));
                    busy = Some(e.into_job());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(accepted >= 1);

        let job = busy.expect("queue should fill up");
        let reply = job.rejection().expect("chat gets a reply");
        assert!(matches!(reply.target, DeliveryTarget::Connection(_)));
        assert!(matches!(reply.event, ServerEvent::ChatError { .. }));

        drop(lane);
        worker.abort();
    }

    #[test]
    fn test_activity_rejection_is_silent() {
        let job = DeferredJob::RecordActivity {
            session: ConnectionSession::new(uuid::Uuid::new_v4(), None),
            entity_data: Value::Null,
        };
        assert!(job.rejection().is_none());
    }

    #[tokio::test]
    async fn test_forget_releases_tracker_entry() {
        let tracker = Arc::new(InMemoryActivityTracker::new());
        let collaborators = Collaborators::new(
            Arc::new(InMemoryMessageStore::new()),
            tracker.clone(),
            Duration::from_secs(1),
        );
        let session = ConnectionSession::new(uuid::Uuid::new_v4(), None);

        collaborators
            .execute(DeferredJob::RecordActivity {
                session: session.clone(),
                entity_data: serde_json::json!({"position": [0, 0]}),
            })
            .await;
        assert!(tracker.last_seen(session.connection_id).is_some());

        collaborators.forget(session.connection_id).await;
        assert!(tracker.last_seen(session.connection_id).is_none());
    }
}
