//! Session registry for live connections
//!
//! This module provides:
//! - Connection session records and room keys
//! - Room membership indexing (rooms exist only while occupied)
//! - Occupancy snapshots and registry statistics
//!
//! The registry never performs I/O. Fan-out lives in [`crate::room`].

mod registry;
mod stats;
mod types;

pub use registry::{SessionRegistry, UpsertOutcome};
pub use stats::{RegistryStats, RoomInfo};
pub use types::{ConnectionId, ConnectionSession, Occupant, PresenceState, RoomKey, DEFAULT_SUBSPACE};
