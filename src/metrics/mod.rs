//! Prometheus metrics for the presence service.
//!
//! This module provides:
//! - Connection metrics (active connections, lifetime, opened/closed)
//! - Room metrics (active rooms, joins and leaves)
//! - Event metrics (received by event name, delivered, failed)
//! - Relay credential issuance
//! - Heartbeat rounds

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, DeliveryMetrics, EventMetrics, HeartbeatMetrics,
    RelayMetrics, RoomMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "presence";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of open WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]
    ).unwrap();

    /// Connections closed by the stale sweep
    pub static ref CONNECTIONS_EXPIRED: IntCounter = register_int_counter!(
        format!("{}_connections_expired_total", METRIC_PREFIX),
        "Total connections removed for inactivity"
    ).unwrap();

    // ============================================================================
    // Room Metrics
    // ============================================================================

    /// Rooms with at least one member
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of rooms with at least one member"
    ).unwrap();

    /// Join outcomes (joined, moved, refreshed, rejected)
    pub static ref ROOM_JOINS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_room_joins_total", METRIC_PREFIX),
        "Total join-space requests by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Event Metrics
    // ============================================================================

    /// Client events received by event name
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_received_total", METRIC_PREFIX),
        "Total client events received",
        &["event"]
    ).unwrap();

    /// Client frames that could not be parsed
    pub static ref EVENTS_INVALID_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_invalid_total", METRIC_PREFIX),
        "Total client frames rejected as malformed"
    ).unwrap();

    /// Events placed on a connection's outbound queue
    pub static ref EVENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_delivered_total", METRIC_PREFIX),
        "Total events queued to connections"
    ).unwrap();

    /// Events skipped because the recipient was full or closed
    pub static ref EVENTS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_failed_total", METRIC_PREFIX),
        "Total event deliveries skipped"
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Relay credential requests by result
    pub static ref RELAY_CREDENTIALS_ISSUED: IntCounterVec = register_int_counter_vec!(
        format!("{}_relay_credentials_total", METRIC_PREFIX),
        "Total relay credential requests by result",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    ).unwrap();
}
