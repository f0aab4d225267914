use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::metrics::{DeliveryMetrics, RoomMetrics};
use crate::session::{ConnectionId, Occupant, RoomKey, SessionRegistry};
use crate::websocket::{now_ms, JoinSpaceRequest, OutboundMessage, ServerEvent};

use super::{ConnectionHandle, DeliveryError, DeliveryTarget, Emission, SpaceAccess};

/// Room broadcasts at or above this many recipients serialize once
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Longest accepted space type, id or subspace
const MAX_ROOM_KEY_PART_LENGTH: usize = 128;

/// Delivery counters
#[derive(Debug, Default)]
struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped_unknown_target: AtomicU64,
    room_broadcasts: AtomicU64,
    direct_messages: AtomicU64,
}

/// Snapshot of delivery statistics
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub dropped_unknown_target: u64,
    pub room_broadcasts: u64,
    pub direct_messages: u64,
}

/// Moves connections between rooms and fans events out to them.
///
/// All membership changes go through the [`SessionRegistry`]; the router only
/// owns the outbound handles. Delivery never waits on a recipient.
pub struct RoomRouter {
    registry: Arc<SessionRegistry>,
    /// connection_id -> ConnectionHandle
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    access: Arc<dyn SpaceAccess>,
    access_timeout: Duration,
    stats: DeliveryStats,
}

impl RoomRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        access: Arc<dyn SpaceAccess>,
        access_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connections: DashMap::new(),
            access,
            access_timeout,
            stats: DeliveryStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Register a connection that completed its handshake (`Connected`, no room)
    pub fn connect(
        &self,
        identity: Option<String>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(Uuid::new_v4(), identity.clone(), sender));
        let connection_id = handle.id;

        self.connections.insert(connection_id, handle.clone());
        self.registry.open(connection_id, identity);

        tracing::info!(
            connection_id = %connection_id,
            identity = ?handle.identity,
            "Connection registered"
        );

        handle
    }

    /// Handle a join-space request.
    ///
    /// Moving rooms yields `user-left` for the old room, then `user-joined`
    /// for the new one, then `space-joined` for the caller. Re-joining the
    /// current room only refreshes carried state and answers the caller.
    /// A rejected join leaves the previous membership untouched.
    #[tracing::instrument(
        name = "router.join",
        skip(self, request),
        fields(
            space_type = %request.space_type,
            space_id = %request.space_id,
            subspace = %request.subspace
        )
    )]
    pub async fn join(&self, connection_id: ConnectionId, request: JoinSpaceRequest) -> Vec<Emission> {
        let Some(session) = self.registry.get(connection_id) else {
            tracing::debug!(connection_id = %connection_id, "Join from unregistered connection");
            RoomMetrics::record_join("rejected");
            return vec![Emission::to(
                connection_id,
                ServerEvent::room_error("NOT_CONNECTED", "Connection is no longer registered, reconnect"),
            )];
        };

        let room = request.room();
        if let Err(reason) = validate_room_key(&room) {
            RoomMetrics::record_join("invalid");
            return vec![Emission::to(
                connection_id,
                ServerEvent::room_error("VALIDATION_ERROR", reason),
            )];
        }

        match timeout(
            self.access_timeout,
            self.access.authorize(session.identity.as_deref(), &room),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    room = %room,
                    error = %e,
                    "Join rejected"
                );
                RoomMetrics::record_join("rejected");
                return vec![Emission::to(
                    connection_id,
                    ServerEvent::room_error(e.code(), e.to_string()),
                )];
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    room = %room,
                    timeout_ms = self.access_timeout.as_millis() as u64,
                    "Access check timed out"
                );
                RoomMetrics::record_join("rejected");
                return vec![Emission::to(
                    connection_id,
                    ServerEvent::room_error("ACCESS_UNAVAILABLE", "access check timed out"),
                )];
            }
        }

        // The stale sweep may disconnect us while authorization runs
        let Some(outcome) = self
            .registry
            .upsert(connection_id, room.clone(), None, request.presence())
        else {
            tracing::debug!(connection_id = %connection_id, room = %room, "Connection closed during join");
            return Vec::new();
        };
        let session = outcome.session;
        let ts = now_ms();
        RoomMetrics::record_join(match (&outcome.left, outcome.refreshed) {
            (_, true) => "refreshed",
            (Some(_), false) => "moved",
            (None, false) => "joined",
        });
        let mut emissions = Vec::with_capacity(3);

        if let Some(old_room) = outcome.left {
            tracing::info!(
                connection_id = %connection_id,
                from = %old_room,
                to = %room,
                "Connection moved between rooms"
            );
            emissions.push(Emission::room(
                old_room,
                ServerEvent::user_left(connection_id, session.identity.clone()),
            ));
        }

        if !outcome.refreshed {
            emissions.push(Emission::room_except(
                room.clone(),
                connection_id,
                ServerEvent::UserJoined {
                    connection_id,
                    identity: session.identity.clone(),
                    display_name: session.display_name(),
                    position: session.state.position.clone(),
                    avatar: session.state.avatar.clone(),
                    ts,
                },
            ));
        }

        emissions.push(Emission::to(
            connection_id,
            ServerEvent::SpaceJoined {
                room,
                occupants: outcome.occupants.iter().map(Occupant::from).collect(),
                ts,
            },
        ));

        emissions
    }

    /// Leave the current room but keep the connection
    pub fn leave(&self, connection_id: ConnectionId) -> Vec<Emission> {
        let Some(session) = self.registry.get(connection_id) else {
            return Vec::new();
        };

        match self.registry.leave_room(connection_id) {
            Some(room) => vec![
                Emission::room(
                    room.clone(),
                    ServerEvent::user_left(connection_id, session.identity),
                ),
                Emission::to(connection_id, ServerEvent::SpaceLeft { room, ts: now_ms() }),
            ],
            None => vec![Emission::to(
                connection_id,
                ServerEvent::error("NOT_IN_SPACE", "Not currently in a space"),
            )],
        }
    }

    /// Forget a connection and close its socket. Safe to call more than
    /// once; only the first call produces a `user-left`.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Vec<Emission> {
        if let Some((_, handle)) = self.connections.remove(&connection_id) {
            handle.close();
        }

        let Some(session) = self.registry.remove(connection_id) else {
            return Vec::new();
        };

        tracing::info!(
            connection_id = %connection_id,
            room = ?session.current_room.as_ref().map(|r| r.to_string()),
            "Connection unregistered"
        );

        match session.current_room {
            Some(room) => vec![Emission::room(
                room,
                ServerEvent::user_left(connection_id, session.identity),
            )],
            None => Vec::new(),
        }
    }

    /// Deliver emissions in order
    pub fn deliver(&self, emissions: impl IntoIterator<Item = Emission>) {
        for emission in emissions {
            match emission.target {
                DeliveryTarget::Room { room, exclude } => {
                    self.broadcast(&room, emission.event, exclude);
                }
                DeliveryTarget::Connection(connection_id) => {
                    self.send_to(connection_id, emission.event);
                }
            }
        }
    }

    /// Send an event to every member of `room` except `exclude`.
    ///
    /// Targets are snapshotted first; a full or closed recipient is skipped.
    /// Returns `(delivered, failed)`.
    pub fn broadcast(
        &self,
        room: &RoomKey,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> (usize, usize) {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .registry
            .members(room)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| self.connections.get(&id).map(|h| h.clone()))
            .collect();

        self.stats.room_broadcasts.fetch_add(1, Ordering::Relaxed);

        if targets.is_empty() {
            return (0, 0);
        }

        let event_name = event.name();
        let outbound = if targets.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundMessage::preserialized(&event) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pre-serialize event, falling back to per-connection serialization");
                    OutboundMessage::Raw(event)
                }
            }
        } else {
            OutboundMessage::Raw(event)
        };

        let mut delivered = 0;
        let mut failed = 0;
        for target in &targets {
            match target.try_deliver(outbound.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    log_delivery_failure(target.id, event_name, e);
                }
            }
        }

        self.record(delivered, failed);

        tracing::debug!(
            room = %room,
            event = event_name,
            delivered = delivered,
            failed = failed,
            "Broadcast to room"
        );

        (delivered, failed)
    }

    /// Send an event to one connection. An absent target is dropped silently.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.stats.direct_messages.fetch_add(1, Ordering::Relaxed);

        let Some(handle) = self.connection(connection_id) else {
            self.stats
                .dropped_unknown_target
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                connection_id = %connection_id,
                event = event.name(),
                "Target connection not found, event dropped"
            );
            return false;
        };

        let event_name = event.name();
        match handle.try_send(event) {
            Ok(()) => {
                self.record(1, 0);
                true
            }
            Err(e) => {
                self.record(0, 1);
                log_delivery_failure(connection_id, event_name, e);
                false
            }
        }
    }

    /// Get connection handle by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Get all connection handles (for heartbeat sending)
    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get delivery statistics
    pub fn stats(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            dropped_unknown_target: self.stats.dropped_unknown_target.load(Ordering::Relaxed),
            room_broadcasts: self.stats.room_broadcasts.load(Ordering::Relaxed),
            direct_messages: self.stats.direct_messages.load(Ordering::Relaxed),
        }
    }

    fn record(&self, delivered: usize, failed: usize) {
        self.stats
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats.failed.fetch_add(failed as u64, Ordering::Relaxed);
        DeliveryMetrics::record(delivered as u64, failed as u64);
    }
}

fn log_delivery_failure(connection_id: ConnectionId, event: &str, error: DeliveryError) {
    tracing::warn!(
        connection_id = %connection_id,
        event = event,
        error = %error,
        "Delivery failed, recipient skipped"
    );
}

/// Validate one part of a room key
fn is_valid_key_part(part: &str) -> bool {
    if part.is_empty() || part.len() > MAX_ROOM_KEY_PART_LENGTH {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, dot and colon
    part.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn validate_room_key(room: &RoomKey) -> Result<(), String> {
    for (field, value) in [
        ("space_type", &room.space_type),
        ("space_id", &room.space_id),
        ("subspace", &room.subspace),
    ] {
        if !is_valid_key_part(value) {
            return Err(format!("Invalid {}: '{}'", field, value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::PolicyAccess;

    fn router() -> RoomRouter {
        RoomRouter::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(PolicyAccess::open()),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_valid_key_parts() {
        assert!(is_valid_key_part("post"));
        assert!(is_valid_key_part("0xAbC123"));
        assert!(is_valid_key_part("doc-1_v2.3"));
        assert!(is_valid_key_part("ns:42"));
    }

    #[test]
    fn test_invalid_key_parts() {
        assert!(!is_valid_key_part(""));
        assert!(!is_valid_key_part("with space"));
        assert!(!is_valid_key_part("a/b"));
        assert!(!is_valid_key_part(&"a".repeat(129)));
    }

    #[test]
    fn test_send_to_unknown_connection_is_dropped() {
        let router = router();
        assert!(!router.send_to(Uuid::new_v4(), ServerEvent::Pong));
        let stats = router.stats();
        assert_eq!(stats.dropped_unknown_target, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_broadcast_skips_failed_recipient() {
        let router = router();
        let room = RoomKey::new("post", "1", "main");

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, rx_b) = mpsc::channel(8);
        let a = router.connect(None, tx_a);
        let b = router.connect(None, tx_b);
        router.registry().upsert(a.id, room.clone(), None, Default::default());
        router.registry().upsert(b.id, room.clone(), None, Default::default());
        drop(rx_b);

        let (delivered, failed) = router.broadcast(&room, ServerEvent::Heartbeat, None);
        assert_eq!((delivered, failed), (1, 1));
        assert!(matches!(
            rx_a.try_recv(),
            Ok(OutboundMessage::Raw(ServerEvent::Heartbeat))
        ));
    }

    #[test]
    fn test_disconnect_twice_emits_once() {
        let router = router();
        let (tx, _rx) = mpsc::channel(8);
        let handle = router.connect(None, tx);
        router
            .registry()
            .upsert(handle.id, RoomKey::new("post", "1", "main"), None, Default::default());

        assert_eq!(router.disconnect(handle.id).len(), 1);
        assert!(router.disconnect(handle.id).is_empty());
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_closes_handle() {
        let router = router();
        let (tx, _rx) = mpsc::channel(8);
        let handle = router.connect(None, tx);

        router.disconnect(handle.id);
        assert!(handle.is_closing());
    }

    #[tokio::test]
    async fn test_join_after_eviction_is_answered() {
        let router = router();
        let (tx, _rx) = mpsc::channel(8);
        let handle = router.connect(None, tx);
        router.disconnect(handle.id);

        let request: JoinSpaceRequest = serde_json::from_value(serde_json::json!({
            "space_type": "post",
            "space_id": "1"
        }))
        .unwrap();
        let emissions = router.join(handle.id, request).await;

        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].target, DeliveryTarget::Connection(handle.id));
        assert!(matches!(
            &emissions[0].event,
            ServerEvent::RoomError { code, .. } if code == "NOT_CONNECTED"
        ));
        assert!(router.registry().get(handle.id).is_none());
        assert_eq!(router.registry().room_count(), 0);
    }
}
