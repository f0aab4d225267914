//! Room routing for live connections
//!
//! This module provides:
//! - Connection handles (the outbound half of each socket)
//! - The join / leave / move state machine on top of the session registry
//! - Room-scoped and point-to-point delivery of server events
//! - The space-access collaborator consulted before a join

mod access;
mod emission;
mod handle;
mod router;

pub use access::{AccessError, PolicyAccess, SpaceAccess};
pub use emission::{DeliveryTarget, Emission};
pub use handle::{ConnectionHandle, DeliveryError};
pub use router::{DeliveryStatsSnapshot, RoomRouter};
