//! WebSocket upgrade endpoints and connection pumps.
//!
//! All three endpoints share one upgrade procedure: resolve the identity,
//! build a [`Connection`], register it, apply the endpoint's
//! auto-subscriptions, then run a write pump task and a read pump until
//! either side ends the connection.

use std::time::Duration;

use airlink_sdk::ws::{decode_frame, join_frames};
use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connection::{CloseReason, Connection, Frame};
use super::hub::Hub;
use crate::config::HubConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Header consulted when the query carries no identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity used when none is supplied.
pub const ANONYMOUS: &str = "anonymous";

/// Upgrade endpoint variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/ws/`, no auto-subscriptions.
    Generic,
    /// `/ws/chat`.
    Chat,
    /// `/ws/presence`, also marks the user online.
    Presence,
}

impl Endpoint {
    /// Channels subscribed right after registration.
    #[must_use]
    pub fn auto_subscriptions(self, user_id: &str) -> Vec<String> {
        match self {
            Self::Generic => Vec::new(),
            Self::Chat => vec![
                "chat:general".to_string(),
                format!("chat:user:{}", user_id),
            ],
            Self::Presence => vec![
                "presence:online".to_string(),
                format!("typing:user:{}", user_id),
            ],
        }
    }

    /// Returns true if connecting refreshes presence.
    #[must_use]
    pub fn tracks_presence(self) -> bool {
        matches!(self, Self::Presence)
    }
}

/// Query parameters accepted by the upgrade endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Caller identity.
    pub user_id: Option<String>,
}

/// Resolves identity: query parameter, then header, then `anonymous`.
/// Empty values count as absent.
#[must_use]
pub fn resolve_user_id(query: Option<&str>, headers: &HeaderMap) -> String {
    query
        .filter(|id| !id.is_empty())
        .or_else(|| {
            headers
                .get(USER_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|id| !id.is_empty())
        })
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// `GET /ws/`
pub async fn ws_generic(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(Endpoint::Generic, state, &params, &headers, ws)
}

/// `GET /ws/chat`
pub async fn ws_chat(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(Endpoint::Chat, state, &params, &headers, ws)
}

/// `GET /ws/presence`
pub async fn ws_presence(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    upgrade(Endpoint::Presence, state, &params, &headers, ws)
}

fn upgrade(
    endpoint: Endpoint,
    state: AppState,
    params: &ConnectParams,
    headers: &HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.config.ws_enabled {
        return ApiError::Unavailable("WebSocket endpoints are disabled".to_string())
            .into_response();
    }
    let user_id = resolve_user_id(params.user_id.as_deref(), headers);

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(
                "WebSocket upgrade rejected for user {} on {:?}: {}",
                user_id, endpoint, rejection
            );
            return rejection.into_response();
        }
    };

    let failed_user = user_id.clone();
    ws.max_message_size(state.hub.config().max_message_size)
        .on_failed_upgrade(move |e| {
            warn!("WebSocket handshake failed for user {}: {}", failed_user, e);
        })
        .on_upgrade(move |socket| serve(socket, endpoint, user_id, state))
}

/// Runs one upgraded socket until it closes.
async fn serve(socket: WebSocket, endpoint: Endpoint, user_id: String, state: AppState) {
    let hub = state.hub.clone();
    let config = hub.config().clone();
    let (conn, outbound) = Connection::new(user_id, config.outbound_buffer);
    let (mut sink, stream) = socket.split();

    if let Err(e) = hub.register(&conn).await {
        warn!("Rejecting connection for user {}: {}", conn.user_id(), e);
        send_close(&mut sink, CloseReason::Shutdown, config.write_wait).await;
        return;
    }

    for channel in endpoint.auto_subscriptions(conn.user_id()) {
        if let Err(e) = hub.subscribe(conn.id(), &channel).await {
            warn!("Auto-subscribe of client {} to {} failed: {}", conn.id(), channel, e);
        }
    }

    let presence = endpoint.tracks_presence().then(|| state.clone());
    refresh_presence(presence.as_ref(), &conn).await;

    let writer = tokio::spawn(write_pump(sink, outbound, conn.clone(), hub.clone()));
    let reason = read_pump(stream, &conn, &state, presence.as_ref()).await;

    conn.close(reason);
    hub.unregister(conn.id()).await;
    if let Err(e) = writer.await {
        warn!("Write pump for client {} ended abnormally: {}", conn.id(), e);
    }
    info!("Connection {} closed: {}", conn.id(), reason);
}

async fn refresh_presence(state: Option<&AppState>, conn: &Connection) {
    let Some(broker) = state.and_then(|state| state.broker.as_ref()) else {
        return;
    };
    if let Err(e) = broker.mark_online(conn.user_id()).await {
        warn!("Failed to mark user {} online: {}", conn.user_id(), e);
        if let Some(state) = state {
            state.hub.metrics().record_broker_failure();
        }
    }
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    conn: &Connection,
    state: &AppState,
    presence: Option<&AppState>,
) -> CloseReason {
    let metrics = state.hub.metrics();
    let pong_wait = state.hub.config().pong_wait;

    loop {
        let next = tokio::select! {
            biased;
            reason = conn.closed() => return reason,
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(
                    "Client {} (user {}) missed the liveness window",
                    conn.id(),
                    conn.user_id()
                );
                metrics.record_pong_timeout();
                return CloseReason::PongTimeout;
            }
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!("Read from client {} failed: {}", conn.id(), e);
                metrics.record_error();
                return CloseReason::Transport;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                for decoded in decode_frame(text.as_str()) {
                    match decoded {
                        Ok(envelope) => {
                            metrics.record_message_received();
                            state.dispatcher.dispatch(conn, envelope).await;
                        }
                        Err(e) => {
                            warn!("Skipping malformed line from client {}: {}", conn.id(), e);
                            metrics.record_error();
                        }
                    }
                }
            }
            Message::Pong(_) => refresh_presence(presence, conn).await,
            Message::Close(_) => return CloseReason::ClientClosed,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    conn: Connection,
    hub: Hub,
) {
    let config: &HubConfig = hub.config();
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            reason = conn.closed() => break reason,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break CloseReason::Transport;
                };
                let mut batch = vec![frame];
                while let Ok(more) = outbound.try_recv() {
                    batch.push(more);
                }
                let text = join_frames(&batch);
                if let Err(reason) = write(&mut sink, Message::Text(text.into()), config.write_wait).await {
                    break reason;
                }
                hub.metrics().record_messages_sent(batch.len() as u64);
            }
            _ = ping.tick() => {
                if let Err(reason) = write(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    break reason;
                }
            }
        }
    };

    if conn.close(reason) {
        debug!("Write pump closed client {}: {}", conn.id(), reason);
    }
    if matches!(
        reason,
        CloseReason::Shutdown | CloseReason::Overflow | CloseReason::PongTimeout
    ) {
        send_close(&mut sink, reason, config.write_wait).await;
    }
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), CloseReason> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Socket write failed: {}", e);
            Err(CloseReason::Transport)
        }
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

async fn send_close(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: CloseReason,
    write_wait: Duration,
) {
    let frame = CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    let _ = write(sink, Message::Close(Some(frame)), write_wait).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_resolve_user_id_order() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("bob"));

        assert_eq!(resolve_user_id(Some("alice"), &headers), "alice");
        assert_eq!(resolve_user_id(None, &headers), "bob");
        assert_eq!(resolve_user_id(Some(""), &headers), "bob");
        assert_eq!(resolve_user_id(None, &HeaderMap::new()), ANONYMOUS);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-User-ID", HeaderValue::from_static("carol"));
        assert_eq!(resolve_user_id(None, &headers), "carol");
    }

    #[test]
    fn test_auto_subscriptions() {
        assert!(Endpoint::Generic.auto_subscriptions("alice").is_empty());
        assert_eq!(
            Endpoint::Chat.auto_subscriptions("alice"),
            vec!["chat:general".to_string(), "chat:user:alice".to_string()]
        );
        assert_eq!(
            Endpoint::Presence.auto_subscriptions("alice"),
            vec!["presence:online".to_string(), "typing:user:alice".to_string()]
        );
    }

    #[test]
    fn test_only_presence_tracks_presence() {
        assert!(Endpoint::Presence.tracks_presence());
        assert!(!Endpoint::Chat.tracks_presence());
        assert!(!Endpoint::Generic.tracks_presence());
    }
}
