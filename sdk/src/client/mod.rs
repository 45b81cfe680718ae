//! HTTP client for the Airlink management surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use airlink_sdk::client::{ManagementClient, SendRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ManagementClient::with_base_url("http://localhost:8080")?;
//!
//!     let online = client.online_users().await?;
//!     println!("{} users online", online.count);
//!
//!     client
//!         .send(&SendRequest::to_channel("chat:general", "chat_response"))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod models;

pub use config::ManagementConfig;
pub use error::ApiError;
pub use http::ManagementClient;
pub use models::{HubStats, OnlineUsers, SendReceipt, SendRequest};
