//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_EXPIRED, EVENTS_DELIVERED_TOTAL, EVENTS_FAILED_TOTAL,
    EVENTS_INVALID_TOTAL, EVENTS_RECEIVED_TOTAL, HEARTBEAT_DURATION_MS, RELAY_CREDENTIALS_ISSUED,
    ROOMS_ACTIVE, ROOM_JOINS_TOTAL, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED,
    WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for WebSocket connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    /// Record a closed connection and how long it lived
    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_expired(count: u64) {
        CONNECTIONS_EXPIRED.inc_by(count);
    }
}

/// Helper struct for room metrics
pub struct RoomMetrics;

impl RoomMetrics {
    pub fn record_join(outcome: &str) {
        ROOM_JOINS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn set_active(count: usize) {
        ROOMS_ACTIVE.set(count as i64);
    }
}

/// Helper struct for client event metrics
pub struct EventMetrics;

impl EventMetrics {
    pub fn record_received(event: &str) {
        EVENTS_RECEIVED_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn record_invalid() {
        EVENTS_INVALID_TOTAL.inc();
    }
}

/// Helper struct for outbound delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record(delivered: u64, failed: u64) {
        if delivered > 0 {
            EVENTS_DELIVERED_TOTAL.inc_by(delivered);
        }
        if failed > 0 {
            EVENTS_FAILED_TOTAL.inc_by(failed);
        }
    }
}

/// Helper struct for relay credential metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_issued() {
        RELAY_CREDENTIALS_ISSUED.with_label_values(&["issued"]).inc();
    }

    /// Credentials were requested but no shared secret is configured
    pub fn record_unconfigured() {
        RELAY_CREDENTIALS_ISSUED
            .with_label_values(&["unconfigured"])
            .inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }
}
