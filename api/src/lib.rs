//! Airlink API - real-time messaging hub.
//!
//! Multiplexes client WebSockets into named channels, fans messages out
//! across instances through a shared broker, and tracks presence.
//!
//! # Modules
//!
//! - [`ws`] - hub, connections and their pumps, upgrade endpoints, dispatch
//! - [`broker`] - pub/sub and presence over Redis or in memory
//! - [`routes`] - management HTTP surface
//! - [`assistant`] - completion and analysis collaborator
//! - [`server`] - router and server lifecycle

pub mod assistant;
pub mod broker;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use assistant::{Assistant, UnavailableAssistant};
pub use broker::{Broker, MemoryBroker, RedisBroker};
pub use config::{ConfigError, HubConfig, ServerConfig};
pub use error::ApiError;
pub use server::{build_router, Server};
pub use state::AppState;
pub use ws::{Hub, HubError, HubRunner};
