//! Resilient client error types.

use std::fmt;

/// Resilient client errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Invalid configuration.
    InvalidConfig(String),

    /// Dialing the server failed.
    Connection(String),

    /// No socket is open.
    NotConnected,

    /// Automatic reconnects were exhausted.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Failed to serialize an envelope.
    Serialization(String),

    /// The client was closed by the caller.
    Closed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::Connection(msg) => write!(f, "connection failed: {}", msg),
            Self::NotConnected => write!(f, "not connected"),
            Self::Exhausted { attempts } => {
                write!(f, "reconnect attempts exhausted after {}", attempts)
            }
            Self::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            Self::Closed => write!(f, "client closed"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<crate::error::EnvelopeError> for ClientError {
    fn from(err: crate::error::EnvelopeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "connection failed: refused");
    }

    #[test]
    fn test_client_error_exhausted() {
        let err = ClientError::Exhausted { attempts: 5 };
        assert_eq!(err.to_string(), "reconnect attempts exhausted after 5");
    }

    #[test]
    fn test_client_error_not_connected() {
        assert_eq!(ClientError::NotConnected.to_string(), "not connected");
        assert_eq!(ClientError::Closed.to_string(), "client closed");
    }
}
