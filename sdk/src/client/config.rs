//! Management client configuration.

use std::time::Duration;

use super::error::ApiError;

/// Default base URL of a local hub.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retries on timeout.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Management client configuration.
#[derive(Debug, Clone)]
pub struct ManagementConfig {
    /// Base URL of the hub, without a trailing slash.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Retries after a timed-out request.
    pub max_retries: u32,

    /// User agent string.
    pub user_agent: String,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("airlink-sdk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ManagementConfig {
    /// Creates a configuration for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty or not HTTP(S).
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.base_url.is_empty() {
            return Err(ApiError::InvalidConfig(
                "base_url cannot be empty".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ApiError::InvalidConfig(
                "base_url must start with http:// or https://".to_string(),
            ));
        }

        Ok(())
    }
}
