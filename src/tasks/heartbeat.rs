use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::metrics::{ConnectionMetrics, HeartbeatMetrics, RoomMetrics};
use crate::room::RoomRouter;
use crate::websocket::ServerEvent;

/// Background task for heartbeat and stale-session cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    router: Arc<RoomRouter>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        router: Arc<RoomRouter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            router,
            shutdown,
        }
    }

    /// Run the heartbeat and cleanup timers until shutdown
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = Duration::from_secs(self.config.connection_timeout);

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats();
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_sessions(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Queue a heartbeat on every connection without waiting on any of them
    fn send_heartbeats(&self) {
        let connections = self.router.all_connections();
        if connections.is_empty() {
            return;
        }

        let start = Instant::now();
        let mut sent = 0usize;
        let mut failed = 0usize;

        for handle in &connections {
            match handle.try_send(ServerEvent::Heartbeat) {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    tracing::debug!(
                        connection_id = %handle.id,
                        error = %e,
                        "Failed to queue heartbeat"
                    );
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        RoomMetrics::set_active(self.router.registry().room_count());

        tracing::debug!(
            total = connections.len(),
            sent = sent,
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );
    }

    /// Disconnect sessions with no inbound activity within `timeout`.
    /// Their rooms see the usual `user-left` and their sockets are closed.
    fn cleanup_stale_sessions(&self, timeout: Duration) {
        let stale = self.router.registry().find_stale(timeout);
        if stale.is_empty() {
            return;
        }

        for connection_id in &stale {
            let emissions = self.router.disconnect(*connection_id);
            self.router.deliver(emissions);
        }

        ConnectionMetrics::record_expired(stale.len() as u64);
        tracing::info!(
            removed = stale.len(),
            timeout_secs = timeout.as_secs(),
            "Cleaned up stale sessions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::PolicyAccess;
    use crate::session::{RoomKey, SessionRegistry};
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn router() -> Arc<RoomRouter> {
        Arc::new(RoomRouter::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(PolicyAccess::open()),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_heartbeat_task_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = HeartbeatTask::new(WebSocketConfig::default(), router(), shutdown_rx);

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_heartbeat_sends_to_connections() {
        let config = WebSocketConfig {
            heartbeat_interval: 1,
            connection_timeout: 60,
            cleanup_interval: 60,
            ..Default::default()
        };
        let router = router();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        let _handle = router.connect(Some("user1".to_string()), tx);

        let task = HeartbeatTask::new(config, router, shutdown_rx);
        let task_handle = tokio::spawn(async move {
            task.run().await;
        });

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Channel should not be closed");

        assert!(matches!(msg, OutboundMessage::Raw(ServerEvent::Heartbeat)));

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }

    #[tokio::test]
    async fn test_stale_sessions_leave_their_rooms() {
        let router = router();
        let room = RoomKey::new("post", "1", "main");

        let (stale_tx, _stale_rx) = mpsc::channel::<OutboundMessage>(10);
        let stale = router.connect(None, stale_tx);
        router.registry().upsert(stale.id, room.clone(), None, Default::default());

        tokio::time::sleep(Duration::from_millis(80)).await;

        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        let fresh = router.connect(None, tx);
        router.registry().upsert(fresh.id, room.clone(), None, Default::default());

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = HeartbeatTask::new(WebSocketConfig::default(), router.clone(), shutdown_rx);
        task.cleanup_stale_sessions(Duration::from_millis(40));

        assert!(router.connection(stale.id).is_none());
        assert!(router.connection(fresh.id).is_some());
        assert!(stale.is_closing());
        assert!(!fresh.is_closing());

        let msg = rx.try_recv().expect("user-left should be queued");
        assert!(matches!(
            msg,
            OutboundMessage::Raw(ServerEvent::UserLeft { connection_id, .. }) if connection_id == stale.id
        ));
    }
}
