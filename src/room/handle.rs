//! Connection handle and delivery errors

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::session::ConnectionId;
use crate::websocket::{OutboundMessage, ServerEvent};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Outbound half of a single WebSocket connection
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Option<String>,
    sender: mpsc::Sender<OutboundMessage>,
    /// Flipped once when the server ends the connection
    closing: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        identity: Option<String>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            id,
            identity,
            sender,
            closing,
        }
    }

    /// Queue a message without waiting. A full queue means a slow reader and
    /// the message is dropped for that reader only.
    pub fn try_deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn try_send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.try_deliver(OutboundMessage::Raw(event))
    }

    /// Ask the socket tasks serving this handle to shut down
    pub fn close(&self) {
        self.closing.send_replace(true);
    }

    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called, immediately if
    /// it already was
    pub async fn closed(&self) {
        let mut rx = self.closing.subscribe();
        // The sender lives in `self`, so this only ends on `true`
        let _ = rx.wait_for(|closing| *closing).await;
    }
}
