//! SDK error types.
//!
//! Provides error types shared by the envelope codec.

/// Envelope encoding and decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The text was not a valid JSON envelope.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}
