//! In-process broker.
//!
//! Delivers published messages to pattern subscribers in the same process and
//! keeps presence in a map of last-refresh instants. Uses `tokio::time` so
//! tests can pause and advance the clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{glob_match, Broker, BrokerError, BrokerMessage, MessageHandler, Subscription};

#[derive(Debug)]
struct Subscriber {
    pattern: String,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

/// In-process [`Broker`].
#[derive(Debug)]
pub struct MemoryBroker {
    ttl: Duration,
    available: AtomicBool,
    published: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    presence: Mutex<HashMap<String, Instant>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl MemoryBroker {
    /// Creates a broker whose presence records expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            available: AtomicBool::new(true),
            published: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            presence: Mutex::new(HashMap::new()),
        }
    }

    /// Simulates an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful publishes.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable)
        }
    }

    fn presence(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, refreshed: Instant, now: Instant) -> bool {
        now.saturating_duration_since(refreshed) < self.ttl
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        self.check_available()?;
        self.published.fetch_add(1, Ordering::SeqCst);

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sub| {
            if !glob_match(&sub.pattern, topic) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(BrokerMessage {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BrokerError> {
        self.check_available()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<BrokerMessage>();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                pattern: pattern.to_string(),
                tx,
            });

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });
        Ok(Subscription::new(task))
    }

    async fn mark_online(&self, user_id: &str) -> Result<(), BrokerError> {
        self.check_available()?;
        self.presence().insert(user_id.to_string(), Instant::now());
        Ok(())
    }

    async fn is_online(&self, user_id: &str) -> Result<bool, BrokerError> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .presence()
            .get(user_id)
            .is_some_and(|refreshed| self.is_fresh(*refreshed, now)))
    }

    async fn list_online(&self) -> Result<Vec<String>, BrokerError> {
        self.check_available()?;
        let now = Instant::now();
        let mut presence = self.presence();
        presence.retain(|_, refreshed| self.is_fresh(*refreshed, now));
        let mut users: Vec<String> = presence.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let broker = MemoryBroker::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = broker
            .subscribe(
                "websocket:*",
                Arc::new(move |msg| {
                    let _ = tx.send(msg);
                }),
            )
            .await
            .expect("subscribe");

        broker
            .publish("websocket:chat:general", "hello")
            .await
            .expect("publish");
        broker.publish("other:topic", "ignored").await.expect("publish");

        let msg = rx.recv().await.expect("message");
        assert_eq!(msg.topic, "websocket:chat:general");
        assert_eq!(msg.payload, "hello");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.published_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broker = MemoryBroker::default();
        let sub = broker
            .subscribe("*", Arc::new(|_| {}))
            .await
            .expect("subscribe");
        drop(sub);
        tokio::time::sleep(Duration::from_millis(20)).await;

        broker.publish("a", "b").await.expect("publish");
        let remaining = broker.subscribers.lock().expect("lock").len();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let broker = MemoryBroker::default();
        broker.set_available(false);
        assert!(matches!(
            broker.publish("a", "b").await,
            Err(BrokerError::Unavailable)
        ));
        assert!(broker.mark_online("u").await.is_err());
        assert!(broker.list_online().await.is_err());

        broker.set_available(true);
        assert!(broker.publish("a", "b").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_expires_after_ttl() {
        let broker = MemoryBroker::new(Duration::from_secs(300));
        broker.mark_online("u").await.expect("mark");
        assert_eq!(broker.list_online().await.expect("list"), vec!["u"]);
        assert!(broker.is_online("u").await.expect("is_online"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!broker.is_online("u").await.expect("is_online"));
        assert!(broker.list_online().await.expect("list").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_refresh_slides_expiry() {
        let broker = MemoryBroker::new(Duration::from_secs(300));
        broker.mark_online("u").await.expect("mark");
        tokio::time::advance(Duration::from_secs(200)).await;
        broker.mark_online("u").await.expect("refresh");
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(broker.is_online("u").await.expect("is_online"));

        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(!broker.is_online("u").await.expect("is_online"));
    }

    #[tokio::test]
    async fn test_list_online_sorted() {
        let broker = MemoryBroker::default();
        broker.mark_online("zed").await.expect("mark");
        broker.mark_online("amy").await.expect("mark");
        assert_eq!(
            broker.list_online().await.expect("list"),
            vec!["amy".to_string(), "zed".to_string()]
        );
    }
}
