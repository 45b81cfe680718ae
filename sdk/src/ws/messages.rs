//! WebSocket message envelope.
//!
//! Every unit exchanged between the client, the hub and the broker is an
//! [`Envelope`]: a typed, timestamped JSON object. The `type` field is the
//! dispatch key; `payload` keeps the key order it was built or received with.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;

/// Message types understood by the hub and its collaborators.
pub mod message_types {
    /// Subscribe the sending connection to `payload.channel`.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Subscription confirmed.
    pub const SUBSCRIBED: &str = "subscribed";
    /// Unsubscribe the sending connection from `payload.channel`.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Unsubscription confirmed.
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    /// Application-level keepalive request.
    pub const PING: &str = "ping";
    /// Application-level keepalive reply.
    pub const PONG: &str = "pong";
    /// Generic error reply.
    pub const ERROR: &str = "error";
    /// Chat prompt for the assistant.
    pub const CHAT_MESSAGE: &str = "chat_message";
    /// Assistant reply to a chat prompt.
    pub const CHAT_RESPONSE: &str = "chat_response";
    /// Prompt passed to the assistant without a system prompt.
    pub const RAW_AI_MESSAGE: &str = "raw_ai_message";
    /// Assistant reply to a raw prompt.
    pub const RAW_AI_RESPONSE: &str = "raw_ai_response";
    /// Assistant typing indicator.
    pub const CHAT_TYPING: &str = "chat_typing";
    /// File analysis request.
    pub const FILE_ANALYSIS: &str = "file_analysis";
    /// File analysis accepted.
    pub const FILE_ANALYSIS_STARTED: &str = "file_analysis_started";
    /// File analysis finished.
    pub const FILE_ANALYSIS_COMPLETE: &str = "file_analysis_complete";
    /// File analysis failed.
    pub const FILE_ANALYSIS_ERROR: &str = "file_analysis_error";
    /// Dataset selection request.
    pub const LOAD_DATASET: &str = "load_dataset";
    /// Dataset selected.
    pub const LOAD_DATASET_SUCCESS: &str = "load_dataset_success";
    /// Dataset selection failed.
    pub const LOAD_DATASET_ERROR: &str = "load_dataset_error";
}

/// The wire format shared by client, hub and broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Dispatch key.
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Target channel, if any.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub channel: Option<String>,

    /// Ordered payload fields.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: Map<String, Value>,

    /// Transmission time, overwritten by the sender. An unreadable value
    /// decodes as the receive time.
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Originating user, if known.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub user_id: Option<String>,
}

impl Envelope {
    /// Creates an envelope of the given type with an empty payload.
    #[must_use]
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            channel: None,
            payload: Map::new(),
            timestamp: Utc::now(),
            user_id: None,
        }
    }

    /// Sets the channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Appends a payload field, keeping insertion order.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Sets the originating user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Overwrites the timestamp with the current time.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.timestamp = Utc::now();
        self
    }

    /// Returns the channel, if set.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Returns a string payload field.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Serializes the envelope to a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::from)
    }

    /// Parses one JSON-encoded envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid envelope.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::from)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => parse_timestamp(&text),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(Utc::now))
}

/// RFC 3339 first, then a naive ISO-8601 date-time read as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialize_minimal() {
        let env = Envelope::new("ping");
        let json = env.to_json().expect("serialize");
        assert!(json.contains(r#""type":"ping""#));
        assert!(!json.contains("channel"));
        assert!(!json.contains("user_id"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_envelope_payload_keeps_order() {
        let env = Envelope::new("chat_response")
            .with_field("zeta", 1)
            .with_field("alpha", 2)
            .with_field("mid", 3);
        let json = env.to_json().expect("serialize");
        let zeta = json.find("zeta").expect("zeta");
        let alpha = json.find("alpha").expect("alpha");
        let mid = json.find("mid").expect("mid");
        assert!(zeta < alpha && alpha < mid);
    }

    #[test]
    fn test_envelope_deserialize_without_timestamp() {
        let env = Envelope::from_json(r#"{"type":"a"}"#).expect("deserialize");
        assert_eq!(env.msg_type, "a");
        assert!(env.channel.is_none());
        assert!(env.payload.is_empty());
    }

    #[test]
    fn test_envelope_naive_timestamp_is_utc() {
        let env = Envelope::from_json(r#"{"type":"a","timestamp":"2024-01-01T10:00:00"}"#)
            .expect("deserialize");
        assert_eq!(env.timestamp.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_envelope_offset_timestamp_is_normalized() {
        let env = Envelope::from_json(r#"{"type":"a","timestamp":"2024-01-01T12:00:00+02:00"}"#)
            .expect("deserialize");
        assert_eq!(env.timestamp.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_envelope_unreadable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        for raw in [
            r#"{"type":"a","timestamp":null}"#,
            r#"{"type":"a","timestamp":"yesterday"}"#,
            r#"{"type":"a","timestamp":1704103200}"#,
        ] {
            let env = Envelope::from_json(raw).expect("deserialize");
            assert_eq!(env.msg_type, "a");
            assert!(env.timestamp >= before);
        }
    }

    #[test]
    fn test_envelope_empty_channel_is_none() {
        let env = Envelope::from_json(r#"{"type":"a","channel":"","payload":null,"user_id":""}"#)
            .expect("deserialize");
        assert!(env.channel().is_none());
        assert!(env.user_id.is_none());
        assert!(env.payload.is_empty());
    }

    #[test]
    fn test_envelope_missing_type_is_error() {
        assert!(Envelope::from_json(r#"{"channel":"x"}"#).is_err());
    }

    #[test]
    fn test_envelope_stamped_overwrites_timestamp() {
        let old = Utc::now() - chrono::Duration::hours(1);
        let env = Envelope {
            timestamp: old,
            ..Envelope::new("a")
        };
        assert!(env.stamped().timestamp > old);
    }

    #[test]
    fn test_envelope_timestamp_is_iso8601() {
        let env = Envelope::new("a");
        let value: Value = serde_json::from_str(&env.to_json().expect("serialize")).expect("json");
        let ts = value["timestamp"].as_str().expect("timestamp string");
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_envelope_payload_str() {
        let env = Envelope::new("subscribe").with_field("channel", "chat:general");
        assert_eq!(env.payload_str("channel"), Some("chat:general"));
        assert_eq!(env.payload_str("missing"), None);
    }
}
