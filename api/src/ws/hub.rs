//! The hub.
//!
//! [`Hub`] is the cloneable front end used by endpoints, routes and broker
//! callbacks. [`HubRunner`] is the single owner of structural state: it
//! drains a command queue and applies each register, unregister, subscribe
//! and unsubscribe under the write half of the one lock covering both the
//! client and channel maps. Fan-out reads a snapshot under the read half and
//! never blocks on a slow connection.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use airlink_sdk::client::HubStats;
use airlink_sdk::Envelope;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{CloseReason, Connection, ConnectionId, Frame, SendOutcome};
use super::metrics::HubMetrics;
use super::registry::Registry;
use super::relay::{BrokerFrame, Target};
use crate::broker::{channel_topic, user_topic, Broker, BrokerMessage, HUB_PATTERN};
use crate::config::HubConfig;

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub no longer accepts registrations.
    #[error("hub is shutting down")]
    ShuttingDown,

    /// The connection is not registered.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    /// No local connection and no broker path for the user.
    #[error("no recipient for user {0}")]
    NoRecipient(String),

    /// The envelope could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

enum Command {
    Register {
        conn: Connection,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
        ack: Option<oneshot::Sender<bool>>,
    },
    Subscribe {
        id: ConnectionId,
        channel: String,
        ack: oneshot::Sender<Result<bool, HubError>>,
    },
    Unsubscribe {
        id: ConnectionId,
        channel: String,
        ack: oneshot::Sender<bool>,
    },
}

struct Shared {
    config: HubConfig,
    instance_id: String,
    registry: RwLock<Registry>,
    commands: mpsc::UnboundedSender<Command>,
    accepting: AtomicBool,
    broker: Option<Arc<dyn Broker>>,
    metrics: HubMetrics,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to the hub.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
}

/// The hub's run loop. Must be driven with [`HubRunner::run`].
pub struct HubRunner {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Hub {
    /// Creates a hub and the runner that owns its state.
    #[must_use]
    pub fn new(config: HubConfig, broker: Option<Arc<dyn Broker>>) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            instance_id: Uuid::new_v4().to_string(),
            registry: RwLock::new(Registry::new()),
            commands: tx,
            accepting: AtomicBool::new(true),
            broker,
            metrics: HubMetrics::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            HubRunner {
                shared,
                commands: rx,
            },
        )
    }

    /// Returns the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Returns this instance's relay origin id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &HubMetrics {
        &self.shared.metrics
    }

    /// Returns the broker, if one is configured.
    #[must_use]
    pub fn broker(&self) -> Option<&Arc<dyn Broker>> {
        self.shared.broker.as_ref()
    }

    /// Returns false once shutdown has begun.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Admits a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ShuttingDown`] once shutdown has begun; the caller
    /// must then close the connection itself.
    pub async fn register(&self, conn: &Connection) -> Result<(), HubError> {
        if !self.is_accepting() {
            return Err(HubError::ShuttingDown);
        }
        let (ack, rx) = oneshot::channel();
        self.command(Command::Register {
            conn: conn.clone(),
            ack,
        })?;
        rx.await.unwrap_or(Err(HubError::ShuttingDown))
    }

    /// Removes a connection and waits for the removal. Idempotent.
    ///
    /// Returns true if the connection was registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let (ack, rx) = oneshot::channel();
        if self
            .command(Command::Unregister { id, ack: Some(ack) })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queues a removal without waiting. Usable from synchronous fan-out.
    pub fn request_unregister(&self, id: ConnectionId) {
        let _ = self.command(Command::Unregister { id, ack: None });
    }

    /// Subscribes a connection to `channel`.
    ///
    /// Returns false if it was already subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownConnection`] if the connection is not
    /// registered.
    pub async fn subscribe(&self, id: ConnectionId, channel: &str) -> Result<bool, HubError> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Subscribe {
            id,
            channel: channel.to_string(),
            ack,
        })?;
        rx.await.unwrap_or(Err(HubError::ShuttingDown))
    }

    /// Unsubscribes a connection from `channel`.
    ///
    /// Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, id: ConnectionId, channel: &str) -> bool {
        let (ack, rx) = oneshot::channel();
        if self
            .command(Command::Unsubscribe {
                id,
                channel: channel.to_string(),
                ack,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Delivers to local subscribers of `channel` and forwards one copy to
    /// the broker for other instances.
    ///
    /// Broker failures are logged and do not affect local delivery. Returns
    /// the number of local connections the frame was queued for.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Serialization`] if the envelope cannot be encoded.
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<usize, HubError> {
        let envelope = envelope.clone().stamped();
        let frame = encode(&envelope)?;
        let delivered = self.deliver_to_channel(channel, &frame);
        debug!("Published to {} ({} local)", channel, delivered);

        self.forward(
            &channel_topic(channel),
            Target::Channel(channel.to_string()),
            envelope,
        )
        .await;
        Ok(delivered)
    }

    /// Delivers to every local connection of `user_id` and forwards one copy
    /// to the broker. Best effort; returns the number of local matches.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NoRecipient`] only when no local connection
    /// matches and the broker path is absent or failed.
    pub async fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> Result<usize, HubError> {
        let envelope = envelope.clone().stamped();
        let frame = encode(&envelope)?;
        let matched = self.deliver_to_user(user_id, &frame);

        let forwarded = self
            .forward(&user_topic(user_id), Target::User(user_id.to_string()), envelope)
            .await;

        if matched == 0 && !forwarded {
            return Err(HubError::NoRecipient(user_id.to_string()));
        }
        Ok(matched)
    }

    /// Sends an envelope to one connection. Returns false if it was not
    /// queued.
    pub fn send_to_connection(&self, conn: &Connection, envelope: &Envelope) -> bool {
        match encode(&envelope.clone().stamped()) {
            Ok(frame) => self.deliver(conn, frame),
            Err(e) => {
                warn!("Failed to encode reply for client {}: {}", conn.id(), e);
                self.shared.metrics.record_error();
                false
            }
        }
    }

    /// Applies a message received from the broker.
    ///
    /// Frames carrying this instance's origin were already delivered locally
    /// at publish time and are skipped.
    pub fn handle_remote(&self, message: &BrokerMessage) {
        let frame = match BrokerFrame::decode(&message.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring undecodable broker message on {}: {}", message.topic, e);
                self.shared.metrics.record_error();
                return;
            }
        };

        if frame.origin == self.shared.instance_id {
            return;
        }

        let encoded = match encode(&frame.message) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to re-encode relayed message: {}", e);
                return;
            }
        };

        let delivered = match &frame.target {
            Target::Channel(channel) => self.deliver_to_channel(channel, &encoded),
            Target::User(user_id) => self.deliver_to_user(user_id, &encoded),
        };
        debug!(
            "Relayed {:?} from {} to {} local connections",
            frame.target, frame.origin, delivered
        );
    }

    /// Returns a snapshot of connection and channel counts.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let registry = self.shared.read();
        HubStats {
            total_clients: registry.client_count(),
            total_channels: registry.channel_count(),
            channels: registry.channel_counts(),
        }
    }

    /// Returns true if the connection is registered.
    #[must_use]
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.shared.read().contains(id)
    }

    /// Returns the channels a connection is subscribed to, sorted.
    #[must_use]
    pub fn subscriptions_of(&self, id: ConnectionId) -> Vec<String> {
        let registry = self.shared.read();
        let mut channels: Vec<String> = registry
            .get(id)
            .map(|entry| entry.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    fn command(&self, command: Command) -> Result<(), HubError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| HubError::ShuttingDown)
    }

    fn deliver_to_channel(&self, channel: &str, frame: &Frame) -> usize {
        let subscribers = self.shared.read().subscribers(channel);
        subscribers
            .iter()
            .filter(|conn| self.deliver(conn, Arc::clone(frame)))
            .count()
    }

    /// Returns the number of matching connections, delivered or not.
    fn deliver_to_user(&self, user_id: &str, frame: &Frame) -> usize {
        let targets = self.shared.read().connections_for_user(user_id);
        for conn in &targets {
            self.deliver(conn, Arc::clone(frame));
        }
        targets.len()
    }

    fn deliver(&self, conn: &Connection, frame: Frame) -> bool {
        match conn.send(frame) {
            SendOutcome::Queued => true,
            SendOutcome::Full => {
                if conn.close(CloseReason::Overflow) {
                    warn!(
                        "Closing client {} (user {}): outbound queue full",
                        conn.id(),
                        conn.user_id()
                    );
                    self.shared.metrics.record_overflow_close();
                }
                self.request_unregister(conn.id());
                false
            }
            SendOutcome::Closed => false,
        }
    }

    /// Returns true if the broker accepted the frame.
    async fn forward(&self, topic: &str, target: Target, message: Envelope) -> bool {
        let Some(broker) = &self.shared.broker else {
            return false;
        };
        let payload = match (BrokerFrame {
            origin: self.shared.instance_id.clone(),
            target,
            message,
        })
        .encode()
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode relay frame for {}: {}", topic, e);
                return false;
            }
        };

        match broker.publish(topic, &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Broker publish to {} failed: {}", topic, e);
                self.shared.metrics.record_broker_failure();
                false
            }
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("instance_id", &self.shared.instance_id)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl HubRunner {
    /// Returns a handle to the hub this runner drives.
    #[must_use]
    pub fn hub(&self) -> Hub {
        Hub {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs until `shutdown` resolves, then closes every connection and
    /// drains their unregistrations for up to the configured grace period.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        info!("Hub {} started", self.shared.instance_id);
        let _subscription = self.subscribe_remote().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    async fn subscribe_remote(&self) -> Option<crate::broker::Subscription> {
        let broker = self.shared.broker.as_ref()?;
        let hub = self.hub();
        let handler = Arc::new(move |message: BrokerMessage| hub.handle_remote(&message));
        match broker.subscribe(HUB_PATTERN, handler).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(
                    "Broker subscribe failed, cross-instance delivery disabled: {}",
                    e
                );
                self.shared.metrics.record_broker_failure();
                None
            }
        }
    }

    async fn shutdown(&mut self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        let connections = self.shared.read().all();
        info!("Hub shutting down, closing {} connections", connections.len());
        for conn in &connections {
            conn.close(CloseReason::Shutdown);
        }

        let deadline = tokio::time::Instant::now() + self.shared.config.shutdown_grace;
        loop {
            let remaining = self.shared.read().client_count();
            if remaining == 0 {
                break;
            }
            match tokio::time::timeout_at(deadline, self.commands.recv()).await {
                Ok(Some(command)) => self.apply(command),
                Ok(None) | Err(_) => break,
            }
        }

        let leftover = self.shared.write().drain();
        if !leftover.is_empty() {
            warn!(
                "{} connections did not unregister within the grace period",
                leftover.len()
            );
            for _ in &leftover {
                self.shared.metrics.record_connection_closed();
            }
        }
        info!("Hub {} stopped", self.shared.instance_id);
    }

    fn apply(&self, command: Command) {
        match command {
            Command::Register { conn, ack } => {
                let result = self.register(conn);
                let _ = ack.send(result);
            }
            Command::Unregister { id, ack } => {
                let removed = self.unregister(id);
                if let Some(ack) = ack {
                    let _ = ack.send(removed);
                }
            }
            Command::Subscribe { id, channel, ack } => {
                let result = match self.shared.write().subscribe(id, &channel) {
                    Some(added) => {
                        if added {
                            self.shared.metrics.record_subscription();
                            debug!("Client {} subscribed to {}", id, channel);
                        }
                        Ok(added)
                    }
                    None => Err(HubError::UnknownConnection(id)),
                };
                let _ = ack.send(result);
            }
            Command::Unsubscribe { id, channel, ack } => {
                let removed = self.shared.write().unsubscribe(id, &channel);
                if removed {
                    self.shared.metrics.record_unsubscription();
                    debug!("Client {} unsubscribed from {}", id, channel);
                }
                let _ = ack.send(removed);
            }
        }
    }

    fn register(&self, conn: Connection) -> Result<(), HubError> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(HubError::ShuttingDown);
        }
        let (id, user_id) = (conn.id(), conn.user_id().to_string());
        let total = {
            let mut registry = self.shared.write();
            registry.insert(conn);
            registry.client_count()
        };
        self.shared.metrics.record_connection_opened();
        info!(
            "Client {} registered for user {} (total clients: {})",
            id, user_id, total
        );
        Ok(())
    }

    fn unregister(&self, id: ConnectionId) -> bool {
        let (entry, total) = {
            let mut registry = self.shared.write();
            let entry = registry.remove(id);
            (entry, registry.client_count())
        };
        let Some(entry) = entry else {
            return false;
        };
        entry.conn.close(CloseReason::ClientClosed);
        self.shared.metrics.record_connection_closed();
        info!(
            "Client {} unregistered for user {} (total clients: {})",
            id,
            entry.conn.user_id(),
            total
        );
        true
    }
}

fn encode(envelope: &Envelope) -> Result<Frame, HubError> {
    envelope
        .to_json()
        .map(Frame::from)
        .map_err(|e| HubError::Serialization(e.to_string()))
}
