use std::sync::Arc;

use uuid::Uuid;

use crate::room::Emission;
use crate::session::{ConnectionId, ConnectionSession, PresenceState, SessionRegistry};
use crate::websocket::{
    now_ms, ChatMessageRequest, RelayKind, RelaySignal, RelaySignalRequest, RoomEvent,
    ServerEvent, StateUpdateRequest, MAX_CHAT_LENGTH,
};

use super::{ChatDraft, DeferredJob};

/// Outcome of dispatching one event: state to merge into the sender's
/// session, what to send now, and what to hand to the connection's deferred
/// lane. Apply `presence` before delivering `emissions`.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub presence: Option<PresenceState>,
    pub emissions: Vec<Emission>,
    pub deferred: Option<DeferredJob>,
}

impl Dispatch {
    fn emit(emission: Emission) -> Self {
        Self {
            emissions: vec![emission],
            ..Self::default()
        }
    }

    fn defer(job: DeferredJob) -> Self {
        Self {
            deferred: Some(job),
            ..Self::default()
        }
    }

    fn none() -> Self {
        Self::default()
    }
}

/// Validates and routes events from connections that are already in a room.
///
/// The registry is only read here. Results come back as [`Dispatch`] values
/// that the caller applies and delivers through the router and the deferred
/// lane.
pub struct EventDispatcher {
    registry: Arc<SessionRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Route one event from `session`
    pub fn dispatch(&self, session: &ConnectionSession, event: RoomEvent) -> Dispatch {
        match event {
            RoomEvent::ChatMessage(request) => self.chat_message(session, request),
            RoomEvent::StateUpdate(request) => self.state_update(session, request),
            RoomEvent::Relay(kind, request) => self.relay_signal(session, request, kind),
            RoomEvent::Ping => Dispatch::emit(Emission::to(session.connection_id, ServerEvent::Pong)),
        }
    }

    fn chat_message(&self, session: &ConnectionSession, request: ChatMessageRequest) -> Dispatch {
        let sender = session.connection_id;
        let Some(room) = session.current_room.clone() else {
            return Dispatch::emit(Emission::to(
                sender,
                ServerEvent::chat_error("Join a space before sending messages"),
            ));
        };

        if let Err(reason) = validate_chat_content(&request.content) {
            tracing::debug!(connection_id = %sender, reason = %reason, "Chat message rejected");
            return Dispatch::emit(Emission::to(sender, ServerEvent::chat_error(reason)));
        }

        Dispatch::defer(DeferredJob::PersistChat {
            draft: ChatDraft {
                room,
                connection_id: sender,
                identity: session.identity.clone(),
                content: request.content,
                message_type: request.message_type,
                parent_id: request.parent_id,
            },
            display_name: session.display_name(),
        })
    }

    fn state_update(&self, session: &ConnectionSession, request: StateUpdateRequest) -> Dispatch {
        let sender = session.connection_id;
        let Some(room) = session.current_room.clone() else {
            return Dispatch::emit(not_in_space(sender));
        };

        let entity_data = request.entity_data();
        let presence = request.presence();
        let mut updated = session.clone();
        updated.state.merge(presence.clone());

        Dispatch {
            presence: Some(presence),
            emissions: vec![Emission::room_except(
                room,
                sender,
                ServerEvent::StateUpdate {
                    connection_id: sender,
                    identity: session.identity.clone(),
                    entity_data: entity_data.clone(),
                    ts: now_ms(),
                },
            )],
            deferred: Some(DeferredJob::RecordActivity {
                session: updated,
                entity_data,
            }),
        }
    }

    fn relay_signal(
        &self,
        session: &ConnectionSession,
        request: RelaySignalRequest,
        kind: RelayKind,
    ) -> Dispatch {
        let sender = session.connection_id;
        if session.current_room.is_none() {
            return Dispatch::emit(not_in_space(sender));
        }

        // Stale or malformed targets are expected during negotiation
        let target = match Uuid::parse_str(&request.target_connection_id) {
            Ok(target) if target != sender && self.registry.contains(target) => target,
            _ => {
                tracing::debug!(
                    connection_id = %sender,
                    target = %request.target_connection_id,
                    "Relay target not connected, signal dropped"
                );
                return Dispatch::none();
            }
        };

        Dispatch::emit(Emission::to(
            target,
            kind.wrap(RelaySignal {
                connection_id: sender,
                identity: session.identity.clone(),
                payload: request.payload,
            }),
        ))
    }
}

fn not_in_space(connection_id: ConnectionId) -> Emission {
    Emission::to(
        connection_id,
        ServerEvent::error("NOT_IN_SPACE", "Join a space first"),
    )
}

/// Content must be non-blank and at most [`MAX_CHAT_LENGTH`] characters
fn validate_chat_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message content cannot be empty".to_string());
    }

    let length = content.chars().count();
    if length > MAX_CHAT_LENGTH {
        return Err(format!(
            "Message content too long ({} > {} characters)",
            length, MAX_CHAT_LENGTH
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::DeliveryTarget;
    use crate::session::RoomKey;
    use serde_json::json;

    fn setup() -> (Arc<SessionRegistry>, EventDispatcher) {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone());
        (registry, dispatcher)
    }

    fn joined(registry: &SessionRegistry, room: &RoomKey) -> ConnectionSession {
        let id = Uuid::new_v4();
        registry.open(id, Some(format!("user-{}", id.simple())));
        registry
            .upsert(id, room.clone(), None, PresenceState::default())
            .unwrap()
            .session
    }

    fn chat(content: &str) -> RoomEvent {
        RoomEvent::ChatMessage(ChatMessageRequest {
            content: content.to_string(),
            message_type: "text".to_string(),
            parent_id: None,
        })
    }

    #[test]
    fn test_chat_length_boundary() {
        assert!(validate_chat_content(&"a".repeat(MAX_CHAT_LENGTH)).is_ok());
        assert!(validate_chat_content(&"a".repeat(MAX_CHAT_LENGTH + 1)).is_err());
        // Characters, not bytes
        assert!(validate_chat_content(&"é".repeat(MAX_CHAT_LENGTH)).is_ok());
        assert!(validate_chat_content("").is_err());
        assert!(validate_chat_content("   \n").is_err());
    }

    #[test]
    fn test_valid_chat_is_deferred() {
        let (registry, dispatcher) = setup();
        let room = RoomKey::new("post", "1", "main");
        let session = joined(&registry, &room);

        let dispatch = dispatcher.dispatch(&session, chat("hello"));
        assert!(dispatch.emissions.is_empty());
        match dispatch.deferred {
            Some(DeferredJob::PersistChat { draft, .. }) => {
                assert_eq!(draft.room, room);
                assert_eq!(draft.content, "hello");
            }
            other => panic!("unexpected deferred job: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_chat_goes_to_sender_only() {
        let (registry, dispatcher) = setup();
        let session = joined(&registry, &RoomKey::new("post", "1", "main"));

        let dispatch = dispatcher.dispatch(&session, chat(&"x".repeat(2001)));
        assert!(dispatch.deferred.is_none());
        assert_eq!(dispatch.emissions.len(), 1);
        assert_eq!(
            dispatch.emissions[0].target,
            DeliveryTarget::Connection(session.connection_id)
        );
        assert!(matches!(dispatch.emissions[0].event, ServerEvent::ChatError { .. }));
    }

    #[test]
    fn test_chat_outside_room_rejected() {
        let (registry, dispatcher) = setup();
        let id = Uuid::new_v4();
        let session = registry.open(id, None);

        let dispatch = dispatcher.dispatch(&session, chat("hello"));
        assert!(dispatch.deferred.is_none());
        assert!(matches!(dispatch.emissions[0].event, ServerEvent::ChatError { .. }));
    }

    #[test]
    fn test_state_update_excludes_sender_and_returns_presence() {
        let (registry, dispatcher) = setup();
        let room = RoomKey::new("global", "lobby", "main");
        let session = joined(&registry, &room);

        let dispatch = dispatcher.dispatch(
            &session,
            RoomEvent::StateUpdate(StateUpdateRequest {
                position: Some(json!({"x": 3})),
                avatar: None,
                extra: Default::default(),
            }),
        );

        assert_eq!(
            dispatch.emissions[0].target,
            DeliveryTarget::Room {
                room,
                exclude: Some(session.connection_id)
            }
        );
        match dispatch.deferred {
            Some(DeferredJob::RecordActivity { session, .. }) => {
                assert_eq!(session.state.position, Some(json!({"x": 3})));
            }
            other => panic!("unexpected deferred job: {:?}", other),
        }
        assert_eq!(
            dispatch.presence.and_then(|p| p.position),
            Some(json!({"x": 3}))
        );
        // Applying the merge is the caller's job
        assert!(registry.get(session.connection_id).unwrap().state.position.is_none());
    }

    #[test]
    fn test_relay_to_absent_target_is_silent() {
        let (registry, dispatcher) = setup();
        let session = joined(&registry, &RoomKey::new("post", "1", "main"));

        for target in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let dispatch = dispatcher.dispatch(
                &session,
                RoomEvent::Relay(
                    RelayKind::Offer,
                    RelaySignalRequest {
                        target_connection_id: target,
                        payload: json!({"sdp": "v=0"}),
                    },
                ),
            );
            assert!(dispatch.emissions.is_empty());
            assert!(dispatch.deferred.is_none());
        }
    }

    #[test]
    fn test_relay_is_point_to_point() {
        let (registry, dispatcher) = setup();
        let room = RoomKey::new("post", "1", "main");
        let caller = joined(&registry, &room);
        let callee = joined(&registry, &room);

        let dispatch = dispatcher.dispatch(
            &caller,
            RoomEvent::Relay(
                RelayKind::Candidate,
                RelaySignalRequest {
                    target_connection_id: callee.connection_id.to_string(),
                    payload: json!({"candidate": "udp 1"}),
                },
            ),
        );

        assert_eq!(dispatch.emissions.len(), 1);
        assert_eq!(
            dispatch.emissions[0].target,
            DeliveryTarget::Connection(callee.connection_id)
        );
        match &dispatch.emissions[0].event {
            ServerEvent::RelayCandidate(signal) => {
                assert_eq!(signal.connection_id, caller.connection_id);
                assert_eq!(signal.identity, caller.identity);
                assert_eq!(signal.payload, json!({"candidate": "udp 1"}));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_ping() {
        let (registry, dispatcher) = setup();
        let session = registry.open(Uuid::new_v4(), None);
        let dispatch = dispatcher.dispatch(&session, RoomEvent::Ping);
        assert!(matches!(dispatch.emissions[0].event, ServerEvent::Pong));
    }
}
