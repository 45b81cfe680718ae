//! Cross-instance relay frames.
//!
//! Every message a hub forwards to the broker is wrapped with the origin
//! instance id so that the origin can recognize and skip its own echo.

use airlink_sdk::Envelope;
use serde::{Deserialize, Serialize};

/// Where a relayed message goes on the receiving instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Every local subscriber of the channel.
    Channel(String),
    /// Every local connection of the user.
    User(String),
}

/// Payload published on `websocket:*` topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerFrame {
    /// Instance id of the publishing hub.
    pub origin: String,
    /// Delivery target.
    pub target: Target,
    /// The envelope, already stamped.
    pub message: Envelope,
}

impl BrokerFrame {
    /// Encodes the frame for the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a broker payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a relay frame.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_wire_shape() {
        let json = serde_json::to_value(Target::Channel("chat:general".to_string()))
            .expect("serialize");
        assert_eq!(json, serde_json::json!({"channel": "chat:general"}));

        let json = serde_json::to_value(Target::User("bob".to_string())).expect("serialize");
        assert_eq!(json, serde_json::json!({"user": "bob"}));
    }

    #[test]
    fn test_decode_foreign_payload_fails() {
        assert!(BrokerFrame::decode(r#"{"type":"chat_response"}"#).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let frame = BrokerFrame {
            origin: "a".to_string(),
            target: Target::User("bob".to_string()),
            message: Envelope::new("notify").with_field("n", 1),
        };
        let decoded = BrokerFrame::decode(&frame.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.origin, "a");
        assert_eq!(decoded.target, Target::User("bob".to_string()));
        assert_eq!(decoded.message.payload.get("n"), Some(&serde_json::json!(1)));
    }
}
