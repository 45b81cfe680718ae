//! WebSocket hub and endpoints.
//!
//! Streams envelopes between connected clients over named channels, and
//! across instances through the broker.
//!
//! # Endpoints
//!
//! - `/ws/` - no auto-subscriptions
//! - `/ws/chat` - `chat:general`, `chat:user:{user_id}`
//! - `/ws/presence` - `presence:online`, `typing:user:{user_id}`; marks the
//!   user online
//!
//! # Message Types
//!
//! - `subscribe` / `unsubscribe` - channel membership
//! - `ping` - answered with `pong`
//! - `chat_message`, `raw_ai_message`, `file_analysis`, `load_dataset` -
//!   assistant flows
//! - anything else with a `channel` is relayed to that channel

pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use connection::{CloseReason, Connection, ConnectionId, Frame, SendOutcome};
pub use dispatch::Dispatcher;
pub use handler::{resolve_user_id, ws_chat, ws_generic, ws_presence, Endpoint};
pub use hub::{Hub, HubError, HubRunner};
pub use metrics::{HubMetrics, HubMetricsSnapshot};
pub use registry::Registry;
pub use relay::{BrokerFrame, Target};
