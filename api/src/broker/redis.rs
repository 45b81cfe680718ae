//! Redis broker.
//!
//! Commands go through a `deadpool-redis` pool. Pattern subscriptions hold a
//! dedicated pub/sub connection that is re-opened after a one-second pause
//! whenever it drops. Presence is a sorted set scored by the epoch
//! milliseconds of the last refresh.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self as pooled, AsyncCommands};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, BrokerMessage, MessageHandler, Subscription, PRESENCE_KEY};

/// Pause before re-opening a dropped pub/sub connection.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Redis-backed [`Broker`].
pub struct RedisBroker {
    pool: Pool,
    client: ::redis::Client,
    ttl: Duration,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("pool", &self.pool.status())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisBroker {
    /// Creates a broker for `url` with the given presence TTL.
    ///
    /// Does not contact the server; see [`RedisBroker::ping`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: &str, ttl: Duration) -> Result<Self, BrokerError> {
        let pool = PoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::Pool(e.to_string()))?;
        let client = ::redis::Client::open(url).map_err(|e| BrokerError::Redis(e.to_string()))?;
        Ok(Self { pool, client, ttl })
    }

    /// Round-trips a `PING`.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: String = pooled::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Pool(e.to_string()))
    }

    fn cutoff_ms(&self) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms().saturating_sub(ttl_ms)
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs().max(1)).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: pooled::Value = conn.publish(topic, payload).await.map_err(redis_error)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BrokerError> {
        let first = open_pubsub(&self.client, pattern).await?;
        info!("Subscribed to Redis pattern {}", pattern);

        let client = self.client.clone();
        let pattern = pattern.to_string();
        let task = tokio::spawn(async move {
            let mut pubsub = Some(first);
            loop {
                if let Some(mut active) = pubsub.take() {
                    let mut stream = active.on_message();
                    while let Some(msg) = stream.next().await {
                        let topic = msg.get_channel_name().to_string();
                        match msg.get_payload::<String>() {
                            Ok(payload) => handler(BrokerMessage { topic, payload }),
                            Err(e) => warn!("Dropping undecodable payload on {}: {}", topic, e),
                        }
                    }
                    warn!("Redis subscription to {} dropped", pattern);
                }

                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                match open_pubsub(&client, &pattern).await {
                    Ok(reopened) => {
                        info!("Resubscribed to Redis pattern {}", pattern);
                        pubsub = Some(reopened);
                    }
                    Err(e) => warn!("Redis resubscribe to {} failed: {}", pattern, e),
                }
            }
        });

        Ok(Subscription::new(task))
    }

    async fn mark_online(&self, user_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        let _: pooled::Value = conn
            .zadd(PRESENCE_KEY, user_id, now_ms())
            .await
            .map_err(redis_error)?;
        let _: pooled::Value = conn
            .expire(PRESENCE_KEY, self.ttl_secs())
            .await
            .map_err(redis_error)?;
        debug!("Marked {} online", user_id);
        Ok(())
    }

    async fn is_online(&self, user_id: &str) -> Result<bool, BrokerError> {
        let mut conn = self.connection().await?;
        let score: Option<f64> = conn
            .zscore(PRESENCE_KEY, user_id)
            .await
            .map_err(redis_error)?;
        #[allow(clippy::cast_precision_loss)]
        let cutoff = self.cutoff_ms() as f64;
        Ok(score.is_some_and(|s| s > cutoff))
    }

    async fn list_online(&self) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.connection().await?;
        let cutoff = self.cutoff_ms();
        let _: pooled::Value = conn
            .zrembyscore(PRESENCE_KEY, "-inf", cutoff)
            .await
            .map_err(redis_error)?;
        let mut users: Vec<String> = conn
            .zrangebyscore(PRESENCE_KEY, "-inf", "+inf")
            .await
            .map_err(redis_error)?;
        users.sort();
        Ok(users)
    }
}

async fn open_pubsub(
    client: &::redis::Client,
    pattern: &str,
) -> Result<::redis::aio::PubSub, BrokerError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BrokerError::Redis(e.to_string()))?;
    pubsub
        .psubscribe(pattern)
        .await
        .map_err(|e| BrokerError::Redis(e.to_string()))?;
    Ok(pubsub)
}

fn redis_error(err: pooled::RedisError) -> BrokerError {
    BrokerError::Redis(err.to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
