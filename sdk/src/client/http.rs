//! HTTP client implementation.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};

use super::config::ManagementConfig;
use super::error::ApiError;
use super::models::{HubStats, OnlineUsers, SendReceipt, SendRequest};

/// Error body produced by the hub.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for the hub's management routes.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    config: ManagementConfig,
    http: reqwest::Client,
}

impl ManagementClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: ManagementConfig) -> Result<Self, ApiError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()
            .map_err(ApiError::Request)?;

        Ok(Self { config, http })
    }

    /// Creates a new client with the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::new(ManagementConfig::new(base_url))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ManagementConfig {
        &self.config
    }

    /// Lists users with a live presence record.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unavailable`] if the hub has no presence store.
    pub async fn online_users(&self) -> Result<OnlineUsers, ApiError> {
        let url = self.url("/online-users");
        self.request_with_retry(|| self.http.get(&url)).await
    }

    /// Delivers an envelope to a user or publishes it to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] unless exactly one target is set, and
    /// [`ApiError::NotFound`] if a direct send found no recipient.
    pub async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ApiError> {
        let url = self.url("/send");
        self.request_with_retry(|| self.http.post(&url).json(request))
            .await
    }

    /// Returns connection and channel counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn stats(&self) -> Result<HubStats, ApiError> {
        let url = self.url("/stats");
        self.request_with_retry(|| self.http.get(&url)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Makes a request, retrying only on timeout.
    async fn request_with_retry<T, F>(&self, request_fn: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retry_count = 0;

        loop {
            match request_fn().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| ApiError::Deserialization(e.to_string()))?;

                    if status.is_success() {
                        return serde_json::from_str(&body)
                            .map_err(|e| ApiError::Deserialization(e.to_string()));
                    }

                    return Err(status_error(status, &body));
                }
                Err(e) => {
                    if e.is_timeout() && retry_count < self.config.max_retries {
                        retry_count += 1;
                        tracing::debug!("Request timed out, retry {}", retry_count);
                        tokio::time::sleep(Duration::from_millis(100 * (1 << retry_count))).await;
                        continue;
                    }
                    return Err(ApiError::from(e));
                }
            }
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::BAD_REQUEST => ApiError::BadRequest(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::SERVICE_UNAVAILABLE => ApiError::Unavailable(message),
        other => ApiError::Status {
            code: other.as_u16(),
            message,
        },
    }
}
