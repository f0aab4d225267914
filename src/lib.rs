// Shared components
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain layer
pub mod events;
pub mod relay;
pub mod room;
pub mod session;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
