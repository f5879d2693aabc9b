//! Client configuration.

use std::env;
use std::time::Duration;

/// Sync client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the write-through apply gateway
    pub gateway_url: String,
    /// Base URL of the shape-stream proxy
    pub shape_url: String,
    /// Token issuer URL
    pub issuer_url: String,
    /// Path to the local SQLite database
    pub database_path: String,
    /// Timeout applied to every network call
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let gateway_url = env::var("FERRY_GATEWAY_URL").map_err(|_| ConfigError::MissingGatewayUrl)?;
        let shape_url = env::var("FERRY_SHAPE_URL").unwrap_or_else(|_| gateway_url.clone());
        let issuer_url = env::var("FERRY_ISSUER_URL").map_err(|_| ConfigError::MissingIssuerUrl)?;
        let database_path =
            env::var("FERRY_DATABASE_PATH").unwrap_or_else(|_| "ferry.db".to_string());

        let request_timeout = env::var("FERRY_REQUEST_TIMEOUT_MS")
            .ok()
            .map(|raw| raw.parse().map_err(|_| ConfigError::InvalidTimeout))
            .transpose()?
            .map_or(Duration::from_secs(30), Duration::from_millis);

        Ok(Self {
            gateway_url,
            shape_url,
            issuer_url,
            database_path,
            request_timeout,
        })
    }

    /// Build the HTTP client shared by the gateway, token fetcher, and
    /// shape consumer. reqwest has no default total timeout, so without
    /// this every network call could hang a sync pass indefinitely.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("FERRY_GATEWAY_URL environment variable is required")]
    MissingGatewayUrl,

    #[error("FERRY_ISSUER_URL environment variable is required")]
    MissingIssuerUrl,

    #[error("Invalid FERRY_REQUEST_TIMEOUT_MS value")]
    InvalidTimeout,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
