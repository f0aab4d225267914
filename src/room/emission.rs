//! Events produced by routing decisions, before any I/O happens.

use crate::session::{ConnectionId, RoomKey};
use crate::websocket::ServerEvent;

/// Where an emitted event goes
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryTarget {
    /// Every current member of `room` except `exclude`. Membership is read at
    /// delivery time.
    Room {
        room: RoomKey,
        exclude: Option<ConnectionId>,
    },
    /// One connection; dropped if it is gone
    Connection(ConnectionId),
}

#[derive(Debug, Clone)]
pub struct Emission {
    pub target: DeliveryTarget,
    pub event: ServerEvent,
}

impl Emission {
    pub fn room(room: RoomKey, event: ServerEvent) -> Self {
        Self {
            target: DeliveryTarget::Room {
                room,
                exclude: None,
            },
            event,
        }
    }

    pub fn room_except(room: RoomKey, exclude: ConnectionId, event: ServerEvent) -> Self {
        Self {
            target: DeliveryTarget::Room {
                room,
                exclude: Some(exclude),
            },
            event,
        }
    }

    pub fn to(connection_id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            target: DeliveryTarget::Connection(connection_id),
            event,
        }
    }
}
