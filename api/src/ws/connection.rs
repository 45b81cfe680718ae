//! Connection handle.
//!
//! A [`Connection`] is the hub-side handle for one upgraded socket: its
//! identity, a bounded outbound queue drained by the write pump, and a close
//! signal observed by both pumps.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::close_code;
use tokio::sync::{mpsc, watch};

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A pre-serialized outbound envelope.
pub type Frame = Arc<str>;

/// Process-unique connection identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the socket.
    ClientClosed,
    /// A read or write failed.
    Transport,
    /// No frame arrived within the liveness window.
    PongTimeout,
    /// A socket write exceeded its deadline.
    WriteTimeout,
    /// The outbound queue was full.
    Overflow,
    /// The hub is shutting down.
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the peer.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::ClientClosed => close_code::NORMAL,
            Self::Shutdown | Self::PongTimeout => close_code::AWAY,
            Self::Overflow => close_code::AGAIN,
            Self::Transport | Self::WriteTimeout => close_code::ERROR,
        }
    }

    /// Short label for logs and close frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client closed",
            Self::Transport => "transport error",
            Self::PongTimeout => "pong timeout",
            Self::WriteTimeout => "write timeout",
            Self::Overflow => "outbound overflow",
            Self::Shutdown => "server shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`Connection::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame is queued.
    Queued,
    /// The queue is full; the caller applies the overflow policy.
    Full,
    /// The connection is closed.
    Closed,
}

struct Inner {
    id: ConnectionId,
    user_id: String,
    outbound: mpsc::Sender<Frame>,
    closed: watch::Sender<Option<CloseReason>>,
    selected_dataset: Mutex<Option<String>>,
}

/// Shared handle to one connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(None);
        let conn = Self {
            inner: Arc::new(Inner {
                id: ConnectionId::next(),
                user_id: user_id.into(),
                outbound,
                closed,
                selected_dataset: Mutex::new(None),
            }),
        };
        (conn, rx)
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the identity resolved at upgrade time.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Enqueues a frame without waiting.
    pub fn send(&self, frame: Frame) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Closed;
        }
        match self.inner.outbound.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Signals both pumps to stop. Returns false if already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.inner.closed.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Returns true once [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.borrow().is_some()
    }

    /// Returns the close reason, if closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.closed.borrow()
    }

    /// Waits until the connection is closed and returns the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.inner.closed.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Transport;
            }
        }
    }

    /// Records the dataset chosen with `load_dataset`.
    pub fn set_selected_dataset(&self, filename: impl Into<String>) {
        *self
            .inner
            .selected_dataset
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(filename.into());
    }

    /// Returns the dataset chosen with `load_dataset`.
    #[must_use]
    pub fn selected_dataset(&self) -> Option<String> {
        self.inner
            .selected_dataset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("closed", &self.close_reason())
            .finish()
    }
}
