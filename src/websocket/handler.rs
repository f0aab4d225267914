use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::events::DeferredLane;
use crate::metrics::{ConnectionMetrics, EventMetrics};
use crate::room::ConnectionHandle;
use crate::server::{bearer_token, AppState};

use super::message::{ClientEvent, OutboundMessage, Routed, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// A missing token admits the caller as a guest; a token that fails
/// validation is refused before the upgrade.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);

    let identity = match state.authenticator.authenticate(token.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "Token validation failed");
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    tracing::info!(identity = ?identity, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    bearer_token(headers).map(str::to_string)
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: AppState, identity: Option<String>) {
    let connection_start = std::time::Instant::now();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.channel_buffer.max(1));

    let handle = state.router.connect(identity.clone(), tx);
    let connection_id = handle.id;
    ConnectionMetrics::record_opened();

    if let Err(e) = handle.try_send(ServerEvent::Connected {
        connection_id,
        identity: identity.clone(),
    }) {
        tracing::warn!(connection_id = %connection_id, error = %e, "Failed to queue connected event");
    }

    tracing::info!(
        connection_id = %connection_id,
        identity = ?identity,
        "WebSocket connection established"
    );

    let (lane, lane_worker) = DeferredLane::spawn(
        state.router.clone(),
        state.collaborators.clone(),
        state.settings.collaborators.lane_capacity,
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let send_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = send_handle.closed() => {
                    // Evicted by the server; the client may reconnect
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "Session expired".into(),
                        })))
                        .await;
                    break;
                }
            };

            // Pre-serialized messages avoid the serialization cost here
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }

            // Clients answer protocol pings on their own, which keeps
            // listen-only connections from looking idle
            if matches!(msg, OutboundMessage::Raw(ServerEvent::Heartbeat))
                && ws_sender.send(Message::Ping(Bytes::new())).await.is_err()
            {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone, &lane).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            send_task.abort();
        }
    }

    // Peers hear about the departure now, not after pending collaborator calls
    let emissions = state.router.disconnect(connection_id);
    state.router.deliver(emissions);

    // Jobs already queued finish in the background and reach whoever is
    // still in the room
    let collaborators = state.collaborators.clone();
    tokio::spawn(async move {
        if let Err(e) = lane_worker.await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Deferred lane ended abnormally");
        }
        collaborators.forget(connection_id).await;
    });

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    lane: &DeferredLane,
) -> bool {
    if handle.is_closing() {
        return false;
    }

    match msg {
        Message::Text(text) => {
            state.registry.touch(handle.id);

            let event: ClientEvent = match serde_json::from_str(&text) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(connection_id = %handle.id, error = %e, "Failed to parse client event");
                    EventMetrics::record_invalid();
                    let _ = handle.try_send(ServerEvent::error("INVALID_MESSAGE", e.to_string()));
                    return true;
                }
            };

            handle_client_event(event, state, handle, lane).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle.try_send(ServerEvent::error(
                "UNSUPPORTED_FORMAT",
                "Binary messages are not supported",
            ));
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself
            state.registry.touch(handle.id);
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client event
#[tracing::instrument(
    name = "ws.event",
    skip(event, state, handle, lane),
    fields(connection_id = %handle.id, event = event.name())
)]
async fn handle_client_event(
    event: ClientEvent,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    lane: &DeferredLane,
) {
    EventMetrics::record_received(event.name());

    match event.route() {
        Routed::Join(request) => {
            let emissions = state.router.join(handle.id, request).await;
            state.router.deliver(emissions);
        }
        Routed::Leave => {
            let emissions = state.router.leave(handle.id);
            state.router.deliver(emissions);
        }
        Routed::Room(event) => {
            let Some(session) = state.registry.get(handle.id) else {
                tracing::debug!(connection_id = %handle.id, "Event from unregistered connection ignored");
                return;
            };

            let dispatch = state.dispatcher.dispatch(&session, event);
            if let Some(presence) = dispatch.presence {
                state.registry.update_state(handle.id, presence);
            }
            state.router.deliver(dispatch.emissions);

            if let Some(job) = dispatch.deferred {
                if let Err(e) = lane.submit(job) {
                    tracing::debug!(connection_id = %handle.id, error = %e, "Deferred job refused");
                    state.router.deliver(e.into_job().rejection());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue};

    #[test]
    fn test_query_token_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        let query = WsQuery {
            token: Some("query-token".into()),
        };

        assert_eq!(extract_token(&query, &headers).as_deref(), Some("query-token"));
    }

    #[test]
    fn test_bearer_header_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        let query = WsQuery { token: None };

        assert_eq!(extract_token(&query, &headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn test_no_token_means_guest() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        let query = WsQuery { token: None };

        assert!(extract_token(&query, &headers).is_none());
    }
}
