//! Realtime transport: wire events and the WebSocket connection handler

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{
    now_ms, ChatMessageRequest, ClientEvent, JoinSpaceRequest, OutboundMessage, RelayKind,
    RelaySignal, RelaySignalRequest, RoomEvent, Routed, ServerEvent, StateUpdateRequest,
    MAX_CHAT_LENGTH,
};
