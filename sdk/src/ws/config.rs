//! Resilient client configuration.

use std::time::Duration;

use super::error::ClientError;

/// Default base reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Default maximum number of automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Resilient client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL, e.g. `ws://localhost:8080/ws/chat`.
    pub url: String,

    /// Identity sent as the `user_id` query parameter.
    pub user_id: Option<String>,

    /// Base reconnect delay; attempt `n` waits `n * reconnect_delay`.
    pub reconnect_delay: Duration,

    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Upper bound on a single dial.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the given URL with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: None,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Sets the user identity.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the base reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the URL to dial, with `user_id` appended when set.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.user_id {
            Some(user_id) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}user_id={}", self.url, sep, encode_query_value(user_id))
            }
            None => self.url.clone(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or not a `ws://`/`wss://` URL,
    /// or if the connect timeout is zero.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.is_empty() {
            return Err(ClientError::InvalidConfig(
                "url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(ClientError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
