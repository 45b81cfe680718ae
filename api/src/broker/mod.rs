//! Broker adapter.
//!
//! A thin seam over a shared publish/subscribe and presence service. The hub
//! uses it for cross-instance fan-out; the upgrade endpoints and management
//! routes use it for presence. Two implementations exist:
//!
//! - [`RedisBroker`] - Redis pub/sub plus a scored set for presence
//! - [`MemoryBroker`] - in-process, for single-instance deployments and tests

pub mod memory;
pub mod redis;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Topic prefix for everything the hub publishes.
pub const TOPIC_PREFIX: &str = "websocket:";

/// Pattern the hub subscribes with.
pub const HUB_PATTERN: &str = "websocket:*";

/// Presence key in the shared store.
pub const PRESENCE_KEY: &str = "online_users";

/// Broker errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The broker is not reachable.
    #[error("broker unavailable")]
    Unavailable,

    /// A Redis command failed.
    #[error("redis error: {0}")]
    Redis(String),

    /// No pooled connection could be obtained.
    #[error("redis pool error: {0}")]
    Pool(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: String,
}

/// Callback invoked once per received message.
pub type MessageHandler = Arc<dyn Fn(BrokerMessage) + Send + Sync>;

/// A live subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wraps the task that drives the subscription.
    #[must_use]
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shared pub/sub and presence service.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// Publishes `payload` on `topic` for every subscribed instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Invokes `handler` for every message whose topic matches `pattern`.
    ///
    /// Patterns use glob syntax (`*`, `?`). The handler runs on the broker's
    /// task, never under hub locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be set up.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BrokerError>;

    /// Records `user_id` as online, sliding its expiry forward by the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store cannot be reached.
    async fn mark_online(&self, user_id: &str) -> Result<(), BrokerError>;

    /// Returns true if `user_id` was marked online within the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store cannot be reached.
    async fn is_online(&self, user_id: &str) -> Result<bool, BrokerError>;

    /// Lists users marked online within the TTL, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store cannot be reached.
    async fn list_online(&self) -> Result<Vec<String>, BrokerError>;
}

/// Topic for channel fan-out.
#[must_use]
pub fn channel_topic(channel: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, channel)
}

/// Topic for direct-to-user fan-out.
#[must_use]
pub fn user_topic(user_id: &str) -> String {
    format!("{}user:{}", TOPIC_PREFIX, user_id)
}

/// Redis-style glob match supporting `*` and `?`.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some(pi);
                mark = ti;
                pi += 1;
            }
            Some(&c) if c == '?' || Some(&c) == t.get(ti) => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                Some(s) => {
                    pi = s + 1;
                    mark += 1;
                    ti = mark;
                }
                None => return false,
            },
        }
    }

    while p.get(pi) == Some(&'*') {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(channel_topic("chat:general"), "websocket:chat:general");
        assert_eq!(user_topic("alice"), "websocket:user:alice");
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("websocket:*", "websocket:chat:general"));
        assert!(glob_match("websocket:*", "websocket:"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("websocket:*", "other:chat"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn test_broker_error_display() {
        assert_eq!(BrokerError::Unavailable.to_string(), "broker unavailable");
        assert_eq!(
            BrokerError::Redis("conn refused".to_string()).to_string(),
            "redis error: conn refused"
        );
    }
}
