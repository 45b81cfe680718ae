//! Resilient WebSocket client.
//!
//! Queues outbound envelopes while disconnected, reconnects with linear
//! backoff after unexpected closures, and dispatches inbound envelopes by
//! type. The connection lifecycle is an explicit state machine published on
//! a watch channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::codec::decode_frame;
use super::config::ClientConfig;
use super::dispatch::{Handler, HandlerTable};
use super::error::ClientError;
use super::messages::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection state of a [`ResilientClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No socket; a reconnect may be scheduled.
    Disconnected,
    /// A dial is in flight.
    Connecting,
    /// A socket is open and the writer is live.
    Connected,
    /// Automatic reconnects gave up; only a manual `connect()` resumes.
    Exhausted,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Client handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    core: Mutex<Core>,
    state: watch::Sender<ClientState>,
    handlers: RwLock<HandlerTable>,
    dials: AtomicU64,
}

/// Mutable connection bookkeeping. `state` is only changed with this locked.
struct Core {
    queue: VecDeque<Envelope>,
    writer: Option<mpsc::UnboundedSender<Envelope>>,
    backoff: Backoff,
    /// Bumped by manual `connect()`/`disconnect()`; stale tasks compare against it.
    epoch: u64,
    /// Identifies the attached socket; bumped on every attach and teardown.
    session: u64,
    /// A reconnect is sleeping out its backoff.
    reconnect_pending: bool,
    manual_close: bool,
}

impl ResilientClient {
    /// Creates a client. Does not dial.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let backoff = Backoff::new(config.reconnect_delay, config.max_reconnect_attempts);
        let (state, _) = watch::channel(ClientState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core {
                    queue: VecDeque::new(),
                    writer: None,
                    backoff,
                    epoch: 0,
                    session: 0,
                    reconnect_pending: false,
                    manual_close: false,
                }),
                state,
                handlers: RwLock::new(HandlerTable::new()),
                dials: AtomicU64::new(0),
            }),
        })
    }

    /// Creates a client for the given URL with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(url))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Number of socket-open attempts made so far.
    #[must_use]
    pub fn dial_count(&self) -> u64 {
        self.inner.dials.load(Ordering::SeqCst)
    }

    /// Number of envelopes waiting for a connection.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Opens the connection.
    ///
    /// Idempotent: when already connected this returns at once, and when a
    /// dial is in flight it waits for that dial instead of opening a second
    /// socket. Clears exhaustion and the reconnect counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the dial fails. Automatic reconnects are still
    /// scheduled in that case.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.state.subscribe();

        let epoch = {
            let mut core = self.inner.lock();
            let current = *self.inner.state.borrow();
            match current {
                ClientState::Connected => return Ok(()),
                ClientState::Connecting => None,
                ClientState::Disconnected | ClientState::Exhausted => {
                    core.backoff.reset();
                    Some(self.inner.begin_dial(&mut core))
                }
            }
        };

        match epoch {
            Some(epoch) => Arc::clone(&self.inner).dial(epoch).await,
            None => {
                let settled = rx
                    .wait_for(|s| *s != ClientState::Connecting)
                    .await
                    .map(|s| *s)
                    .map_err(|_| ClientError::Closed)?;
                match settled {
                    ClientState::Connected => Ok(()),
                    ClientState::Exhausted => Err(ClientError::Exhausted {
                        attempts: self.inner.config.max_reconnect_attempts,
                    }),
                    ClientState::Disconnected | ClientState::Connecting => {
                        Err(ClientError::NotConnected)
                    }
                }
            }
        }
    }

    /// Sends an envelope, or queues it until the next connection.
    ///
    /// The timestamp is overwritten at transmission time. While disconnected
    /// this also starts a connection attempt, unless a reconnect is already
    /// waiting out its backoff. While exhausted it only queues. Unlike
    /// [`Self::connect`], the attempt keeps the reconnect counter.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for transports that can reject.
    pub fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        let dial_epoch = {
            let mut core = self.inner.lock();
            let envelope = match &core.writer {
                Some(writer) => match writer.send(envelope) {
                    Ok(()) => return Ok(()),
                    Err(mpsc::error::SendError(envelope)) => {
                        core.writer = None;
                        envelope
                    }
                },
                None => envelope,
            };
            core.queue.push_back(envelope);

            let idle = *self.inner.state.borrow() == ClientState::Disconnected
                && !core.reconnect_pending;
            if idle && tokio::runtime::Handle::try_current().is_ok() {
                Some(self.inner.begin_dial(&mut core))
            } else {
                if idle {
                    debug!("No runtime available; envelope queued without dialing");
                }
                None
            }
        };

        if let Some(epoch) = dial_epoch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = inner.dial(epoch).await {
                    debug!("Background connect failed: {}", e);
                }
            });
        }
        Ok(())
    }

    /// Registers the handler for `msg_type`, replacing any earlier one.
    ///
    /// Use [`super::dispatch::WILDCARD`] to receive every envelope.
    pub fn on_message<F>(&self, msg_type: impl Into<String>, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let msg_type = msg_type.into();
        let handler: Handler = Arc::new(handler);
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(msg_type.as_str(), handler).is_some() {
            debug!("Replaced handler for {}", msg_type);
        }
        debug!("{} message types have handlers", handlers.len());
    }

    /// Closes the socket with the normal-closure code and stops automatic
    /// reconnects. Queued envelopes are kept.
    pub fn disconnect(&self) {
        let mut core = self.inner.lock();
        core.manual_close = true;
        core.epoch += 1;
        core.session += 1;
        core.reconnect_pending = false;
        core.writer = None;
        self.inner.state.send_replace(ClientState::Disconnected);
        info!("Client disconnected by caller");
    }
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Supersedes any earlier dial or session and moves to `Connecting`.
    /// Returns the epoch the new dial runs under.
    fn begin_dial(&self, core: &mut Core) -> u64 {
        core.manual_close = false;
        core.reconnect_pending = false;
        core.epoch += 1;
        core.session += 1;
        self.state.send_replace(ClientState::Connecting);
        core.epoch
    }

    async fn dial(self: Arc<Self>, epoch: u64) -> Result<(), ClientError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let url = self.config.connection_url();
        debug!("Dialing {}", url);

        let dialed =
            tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await;

        let stream = match dialed {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let err = ClientError::from(e);
                warn!("Connect to {} failed: {}", url, err);
                self.on_dial_failed(epoch);
                return Err(err);
            }
            Err(_) => {
                warn!("Connect to {} timed out", url);
                self.on_dial_failed(epoch);
                return Err(ClientError::Connection("connect timed out".to_string()));
            }
        };

        self.attach(epoch, stream)
    }

    /// Installs a fresh socket: flushes the queue into the new writer before
    /// anything else can reach it, then publishes `Connected`.
    fn attach(self: Arc<Self>, epoch: u64, stream: WsStream) -> Result<(), ClientError> {
        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let session = {
            let mut core = self.lock();
            if core.epoch != epoch || core.manual_close {
                drop(core);
                debug!("Discarding socket from a superseded dial");
                tokio::spawn(close_quietly(sink));
                return Err(ClientError::Closed);
            }

            let flushed = core.queue.len();
            for envelope in core.queue.drain(..) {
                // rx is alive in this scope
                let _ = tx.send(envelope);
            }
            core.session += 1;
            core.writer = Some(tx);
            core.backoff.reset();
            self.state.send_replace(ClientState::Connected);
            info!(
                "Connected to {} (flushed {} queued messages)",
                self.config.url, flushed
            );
            core.session
        };

        tokio::spawn(run_writer(Arc::clone(&self), session, sink, rx));
        tokio::spawn(run_reader(self, session, source));
        Ok(())
    }

    fn on_dial_failed(self: &Arc<Self>, epoch: u64) {
        let mut core = self.lock();
        if core.epoch != epoch {
            return;
        }
        if core.manual_close {
            self.state.send_replace(ClientState::Disconnected);
            return;
        }
        self.schedule_reconnect(&mut core);
    }

    fn on_session_end(self: &Arc<Self>, session: u64, clean: bool) {
        let mut core = self.lock();
        if core.session != session {
            return;
        }
        core.session += 1;
        core.writer = None;

        if clean || core.manual_close {
            info!("Connection closed normally");
            self.state.send_replace(ClientState::Disconnected);
            return;
        }

        warn!("Connection lost");
        self.schedule_reconnect(&mut core);
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core) {
        match core.backoff.next_delay() {
            Some(delay) => {
                core.reconnect_pending = true;
                self.state.send_replace(ClientState::Disconnected);
                info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    core.backoff.attempts(),
                    self.config.max_reconnect_attempts
                );
                let inner = Arc::clone(self);
                let epoch = core.epoch;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.reconnect(epoch).await;
                });
            }
            None => {
                self.state.send_replace(ClientState::Exhausted);
                warn!(
                    "Giving up after {} reconnect attempts; {} messages remain queued",
                    core.backoff.attempts(),
                    core.queue.len()
                );
            }
        }
    }

    async fn reconnect(self: Arc<Self>, epoch: u64) {
        {
            let mut core = self.lock();
            if core.epoch != epoch
                || core.manual_close
                || *self.state.borrow() != ClientState::Disconnected
            {
                return;
            }
            core.reconnect_pending = false;
            self.state.send_replace(ClientState::Connecting);
        }
        if let Err(e) = self.dial(epoch).await {
            debug!("Reconnect attempt failed: {}", e);
        }
    }

    /// Returns envelopes a failed writer could not transmit to the front of
    /// the queue, preserving their order.
    fn requeue(&self, session: u64, failed: Envelope, rx: &mut mpsc::UnboundedReceiver<Envelope>) {
        let mut core = self.lock();
        if core.session == session {
            core.writer = None;
        }

        let mut pending = vec![failed];
        while let Ok(envelope) = rx.try_recv() {
            pending.push(envelope);
        }
        debug!("Requeueing {} untransmitted messages", pending.len());

        match &core.writer {
            Some(writer) => {
                for envelope in pending {
                    // a live writer of a newer session takes them
                    let _ = writer.send(envelope);
                }
            }
            None => {
                for envelope in pending.into_iter().rev() {
                    core.queue.push_front(envelope);
                }
            }
        }
    }

    fn dispatch_frame(&self, frame: &str) {
        for decoded in decode_frame(frame) {
            match decoded {
                Ok(envelope) => {
                    let handlers = self
                        .handlers
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .resolve(&envelope);
                    if handlers.is_empty() {
                        debug!("No handler for message type {}", envelope.msg_type);
                    }
                    for handler in handlers {
                        handler(&envelope);
                    }
                }
                Err(e) => warn!("Skipping malformed line: {}", e),
            }
        }
    }
}

async fn run_writer(
    inner: Arc<Inner>,
    session: u64,
    mut sink: WsSink,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let text = match envelope.clone().stamped().to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Dropping unserializable message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!("Write failed: {}", e);
            inner.requeue(session, envelope, &mut rx);
            return;
        }
    }

    // Every sender is gone: the session was closed on purpose.
    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = sink.send(Message::Close(Some(close))).await;
}

async fn run_reader(inner: Arc<Inner>, session: u64, mut source: WsSource) {
    let mut clean = false;
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => inner.dispatch_frame(text.as_str()),
            Ok(Message::Close(frame)) => {
                clean = frame.is_some_and(|f| f.code == CloseCode::Normal);
                debug!("Received close frame (normal: {})", clean);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Read failed: {}", e);
                break;
            }
        }
    }
    inner.on_session_end(session, clean);
}

async fn close_quietly(mut sink: WsSink) {
    let _ = sink.close().await;
}
