//! WebSocket envelope, frame codec and resilient client.
//!
//! # Example
//!
//! ```rust,ignore
//! use airlink_sdk::ws::{ClientConfig, Envelope, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("ws://localhost:8080/ws/chat").with_user_id("alice");
//!     let client = ResilientClient::new(config)?;
//!
//!     client.on_message("chat_response", |env| {
//!         println!("assistant: {:?}", env.payload_str("content"));
//!     });
//!
//!     // Queued until the socket is open, then flushed in order.
//!     client.send(Envelope::new("chat_message").with_field("content", "hello"))?;
//!     client.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod messages;

pub use backoff::Backoff;
pub use client::{ClientState, ResilientClient};
pub use codec::{decode_frame, decode_frame_lossy, join_frames};
pub use config::ClientConfig;
pub use dispatch::{Handler, HandlerTable, WILDCARD};
pub use error::ClientError;
pub use messages::{message_types, Envelope};
