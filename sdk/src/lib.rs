//! Airlink SDK - client library for the Airlink real-time messaging hub.
//!
//! # Modules
//!
//! - [`ws`] - the [`Envelope`] wire format, the newline frame codec and the
//!   [`ResilientClient`] that queues, reconnects and dispatches by type
//! - [`client`] - [`ManagementClient`] for the hub's HTTP management routes
//!
//! # Example
//!
//! ```rust
//! use airlink_sdk::Envelope;
//!
//! let env = Envelope::new("subscribe").with_field("channel", "chat:general");
//! assert_eq!(env.payload_str("channel"), Some("chat:general"));
//! ```

pub mod client;
pub mod error;
pub mod ws;

pub use client::ManagementClient;
pub use error::EnvelopeError;
pub use ws::{ClientConfig, ClientError, ClientState, Envelope, ResilientClient};
