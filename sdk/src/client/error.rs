//! Management client error types.

use std::fmt;

/// Management client errors.
#[derive(Debug)]
pub enum ApiError {
    /// HTTP request failed.
    Request(reqwest::Error),

    /// Failed to deserialize response.
    Deserialization(String),

    /// The hub rejected the request (400).
    BadRequest(String),

    /// No recipient for a direct send (404).
    NotFound(String),

    /// A hub dependency is down (503).
    Unavailable(String),

    /// Any other non-success status.
    Status {
        /// HTTP status code.
        code: u16,
        /// Error message from the body.
        message: String,
    },

    /// Invalid configuration.
    InvalidConfig(String),

    /// Request timeout.
    Timeout,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "HTTP request failed: {}", e),
            Self::Deserialization(msg) => write!(f, "deserialization failed: {}", msg),
            Self::BadRequest(msg) => write!(f, "bad request: {}", msg),
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::Unavailable(msg) => write!(f, "service unavailable: {}", msg),
            Self::Status { code, message } => write!(f, "HTTP {}: {}", code, message),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::Timeout => write!(f, "request timeout"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}
