//! Management routes.
//!
//! Plain HTTP endpoints for collaborators: presence listing, server-initiated
//! sends, and hub statistics.

use airlink_sdk::client::{HubStats, OnlineUsers, SendReceipt, SendRequest};
use airlink_sdk::Envelope;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::HubMetricsSnapshot;

/// Returns the management routes.
pub fn management_routes() -> Router<AppState> {
    Router::new()
        .route("/online-users", get(online_users))
        .route("/send", post(send))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
}

/// `GET /online-users`
async fn online_users(State(state): State<AppState>) -> Result<Json<OnlineUsers>, ApiError> {
    let broker = state
        .broker
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("presence is not configured".to_string()))?;
    let users = broker.list_online().await.map_err(|e| {
        state.hub.metrics().record_broker_failure();
        ApiError::from(e)
    })?;
    Ok(Json(OnlineUsers::new(users)))
}

/// `POST /send`
async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendReceipt>, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!("Rejected send body: {}", e);
        ApiError::BadRequest("Invalid request body".to_string())
    })?;

    if request.msg_type.is_empty() {
        return Err(ApiError::BadRequest("type is required".to_string()));
    }

    let user_id = request.user_id.filter(|id| !id.is_empty());
    let channel = request.channel.filter(|ch| !ch.is_empty());
    let envelope = Envelope::new(request.msg_type).with_payload(request.payload);

    match (user_id, channel) {
        (Some(user_id), None) => {
            let matched = state.hub.send_to_user(&user_id, &envelope).await.map_err(|e| {
                warn!("Send to user {} failed: {}", user_id, e);
                ApiError::from(e)
            })?;
            debug!("Sent {} to user {} ({} local)", envelope.msg_type, user_id, matched);
        }
        (None, Some(channel)) => {
            let envelope = envelope.with_channel(channel.as_str());
            let delivered = state.hub.publish(&channel, &envelope).await?;
            debug!("Sent {} to {} ({} local)", envelope.msg_type, channel, delivered);
        }
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "only one of user_id or channel may be set".to_string(),
            ));
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "user_id or channel is required".to_string(),
            ));
        }
    }

    Ok(Json(SendReceipt {
        message: "Message sent successfully".to_string(),
    }))
}

/// `GET /stats`
async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

/// `GET /metrics`
async fn metrics(State(state): State<AppState>) -> Json<HubMetricsSnapshot> {
    Json(state.hub.metrics().snapshot())
}
