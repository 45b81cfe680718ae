//! API error types.
//!
//! Maps hub and broker failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::broker::BrokerError;
use crate::ws::HubError;

/// Errors returned by the management routes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request (400).
    #[error("{0}")]
    BadRequest(String),

    /// Nothing to deliver to (404).
    #[error("{0}")]
    NotFound(String),

    /// A dependency is down (503).
    #[error("{0}")]
    Unavailable(String),

    /// Anything else (500).
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NoRecipient(_) => Self::NotFound(err.to_string()),
            HubError::ShuttingDown => Self::Unavailable(err.to_string()),
            HubError::UnknownConnection(_) => Self::NotFound(err.to_string()),
            HubError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Serialization(_) => Self::Internal(err.to_string()),
            BrokerError::Unavailable | BrokerError::Redis(_) | BrokerError::Pool(_) => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}
