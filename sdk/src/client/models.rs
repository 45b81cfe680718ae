//! Request and response bodies of the management surface.
//!
//! Shared by the hub's routes and [`super::ManagementClient`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `GET /online-users` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUsers {
    /// Users with a live presence record.
    pub online_users: Vec<String>,
    /// Length of `online_users`.
    pub count: usize,
}

impl OnlineUsers {
    /// Builds the response from a user list.
    #[must_use]
    pub fn new(online_users: Vec<String>) -> Self {
        let count = online_users.len();
        Self {
            online_users,
            count,
        }
    }
}

/// `POST /send` body. Exactly one of `user_id` and `channel` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Direct recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Channel to publish to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Envelope type.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Envelope payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl SendRequest {
    /// A direct send to every connection of `user_id`.
    #[must_use]
    pub fn to_user(user_id: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            channel: None,
            msg_type: msg_type.into(),
            payload: Map::new(),
        }
    }

    /// A publish to `channel`.
    #[must_use]
    pub fn to_channel(channel: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            user_id: None,
            channel: Some(channel.into()),
            msg_type: msg_type.into(),
            payload: Map::new(),
        }
    }

    /// Appends a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// `POST /send` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Human-readable confirmation.
    pub message: String,
}

/// `GET /stats` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Registered connections.
    pub total_clients: usize,
    /// Channels with at least one subscriber.
    pub total_channels: usize,
    /// Subscriber count per channel.
    pub channels: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_users_count() {
        let body = OnlineUsers::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(body.count, 2);
    }

    #[test]
    fn test_send_request_serialization() {
        let req = SendRequest::to_channel("chat:general", "chat_response").with_field("content", "hi");
        let json = serde_json::to_string(&req).expect("serialize");
        assert!(!json.contains("user_id"));
        assert!(json.contains(r#""type":"chat_response""#));
        assert!(json.contains(r#""content":"hi""#));
    }

    #[test]
    fn test_send_request_payload_optional() {
        let req: SendRequest =
            serde_json::from_str(r#"{"user_id":"bob","type":"notify"}"#).expect("deserialize");
        assert_eq!(req.user_id.as_deref(), Some("bob"));
        assert!(req.payload.is_empty());
    }

    #[test]
    fn test_stats_deserialize() {
        let stats: HubStats = serde_json::from_str(
            r#"{"total_clients":1,"total_channels":2,"channels":{"a":1,"b":1}}"#,
        )
        .expect("deserialize");
        assert_eq!(stats.channels.get("a"), Some(&1));
    }
}
