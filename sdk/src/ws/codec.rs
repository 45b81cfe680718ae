//! Frame codec.
//!
//! A transport frame holds one or more newline-delimited envelopes. Writers
//! coalesce queued envelopes into a single frame, so readers must split.

use super::messages::Envelope;
use crate::error::EnvelopeError;

/// Splits a frame into lines and decodes each one independently.
///
/// Empty lines are skipped. A malformed line yields an `Err` item without
/// affecting the lines around it.
pub fn decode_frame(frame: &str) -> impl Iterator<Item = Result<Envelope, EnvelopeError>> + '_ {
    frame
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Envelope::from_json)
}

/// Decodes a frame, logging and dropping malformed lines.
#[must_use]
pub fn decode_frame_lossy(frame: &str) -> Vec<Envelope> {
    decode_frame(frame)
        .filter_map(|result| match result {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!("Skipping malformed line in frame: {}", e);
                None
            }
        })
        .collect()
}

/// Joins pre-serialized envelopes into one frame.
#[must_use]
pub fn join_frames<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n")
}
