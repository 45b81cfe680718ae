//! Server configuration.
//!
//! Loaded from `AIRLINK_*` environment variables with defaults; every value
//! can also be set through `with_*` builders.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Hub and connection timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound queue capacity per connection.
    pub outbound_buffer: usize,
    /// Interval between server pings.
    pub ping_period: Duration,
    /// Time allowed between inbound frames.
    pub pong_wait: Duration,
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for connections to unregister.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            ping_period: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl HubConfig {
    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    /// Sets the ping period and pong wait together.
    #[must_use]
    pub fn with_liveness(mut self, ping_period: Duration, pong_wait: Duration) -> Self {
        self.ping_period = ping_period;
        self.pong_wait = pong_wait;
        self
    }

    /// Sets the write deadline.
    #[must_use]
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// Sets the maximum inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or the pong wait does not
    /// exceed the ping period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "outbound_buffer must be greater than 0".to_string(),
            ));
        }
        if self.ping_period.is_zero() {
            return Err(ConfigError::Invalid(
                "ping_period must be greater than 0".to_string(),
            ));
        }
        if self.pong_wait <= self.ping_period {
            return Err(ConfigError::Invalid(
                "pong_wait must exceed ping_period".to_string(),
            ));
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::Invalid(
                "write_wait must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// When false the upgrade endpoints answer 503.
    pub ws_enabled: bool,
    /// Hub and connection timing.
    pub hub: HubConfig,
    /// Redis URL; the in-memory broker is used when unset.
    pub redis_url: Option<String>,
    /// Presence TTL.
    pub presence_ttl: Duration,
    /// Chat completion timeout.
    pub assistant_timeout: Duration,
    /// File analysis timeout.
    pub analysis_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_enabled: true,
            hub: HubConfig::default(),
            redis_url: None,
            presence_ttl: Duration::from_secs(300),
            assistant_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration bound to `host:port` with defaults elsewhere.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let hub_defaults = HubConfig::default();

        let config = Self {
            host: env::var("AIRLINK_HOST").unwrap_or(defaults.host),
            port: env_parse("AIRLINK_PORT", defaults.port)?,
            ws_enabled: env_parse("AIRLINK_WS_ENABLED", defaults.ws_enabled)?,
            hub: HubConfig {
                outbound_buffer: env_parse("AIRLINK_OUTBOUND_BUFFER", hub_defaults.outbound_buffer)?,
                ping_period: env_secs("AIRLINK_PING_PERIOD_SECS", hub_defaults.ping_period)?,
                pong_wait: env_secs("AIRLINK_PONG_WAIT_SECS", hub_defaults.pong_wait)?,
                write_wait: env_secs("AIRLINK_WRITE_WAIT_SECS", hub_defaults.write_wait)?,
                max_message_size: env_parse(
                    "AIRLINK_MAX_MESSAGE_SIZE",
                    hub_defaults.max_message_size,
                )?,
                shutdown_grace: env_secs("AIRLINK_SHUTDOWN_GRACE_SECS", hub_defaults.shutdown_grace)?,
            },
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            presence_ttl: env_secs("AIRLINK_PRESENCE_TTL_SECS", defaults.presence_ttl)?,
            assistant_timeout: env_secs("AIRLINK_ASSISTANT_TIMEOUT_SECS", defaults.assistant_timeout)?,
            analysis_timeout: env_secs("AIRLINK_ANALYSIS_TIMEOUT_SECS", defaults.analysis_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Enables or disables the upgrade endpoints.
    #[must_use]
    pub fn with_ws_enabled(mut self, enabled: bool) -> Self {
        self.ws_enabled = enabled;
        self
    }

    /// Replaces the hub configuration.
    #[must_use]
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// Sets the Redis URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Sets the presence TTL.
    #[must_use]
    pub fn with_presence_ttl(mut self, ttl: Duration) -> Self {
        self.presence_ttl = ttl;
        self
    }

    /// Sets the assistant and analysis timeouts.
    #[must_use]
    pub fn with_assistant_timeouts(mut self, chat: Duration, analysis: Duration) -> Self {
        self.assistant_timeout = chat;
        self.analysis_timeout = analysis;
        self
    }

    /// Returns the socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address {}", self.host)))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hub.validate()?;
        if self.presence_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "presence_ttl must be greater than 0".to_string(),
            ));
        }
        if self.assistant_timeout.is_zero() || self.analysis_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "assistant timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.outbound_buffer, 256);
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_hub_config_rejects_zero_buffer() {
        let config = HubConfig::default().with_outbound_buffer(0);
        assert_err!(config.validate());
    }

    #[test]
    fn test_hub_config_rejects_short_pong_wait() {
        let config =
            HubConfig::default().with_liveness(Duration::from_secs(10), Duration::from_secs(10));
        assert_err!(config.validate());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.ws_enabled);
        assert!(config.redis_url.is_none());
        assert_eq!(config.presence_ttl, Duration::from_secs(300));
        assert_ok!(config.validate());
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new("127.0.0.1", 9000)
            .with_ws_enabled(false)
            .with_redis_url("redis://localhost:6379")
            .with_presence_ttl(Duration::from_secs(5))
            .with_assistant_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(config.port, 9000);
        assert!(!config.ws_enabled);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.analysis_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::new("127.0.0.1", 9000);
        assert_eq!(
            config.socket_addr().expect("addr"),
            "127.0.0.1:9000".parse::<SocketAddr>().expect("parse")
        );
        assert!(ServerConfig::new("not a host", 1).socket_addr().is_err());
    }

    #[test]
    fn test_env_parse_default_when_unset() {
        let value: u16 = env_parse("AIRLINK_TEST_SURELY_UNSET_VAR", 42).expect("parse");
        assert_eq!(value, 42);
    }
}
