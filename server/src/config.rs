//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Secret key for signing and verifying bearer tokens
    pub auth_secret: String,
    /// Lifetime of issued tokens, in seconds
    pub token_ttl_secs: i64,
    /// Base URL of the upstream change-stream service the shape proxy
    /// forwards to
    pub upstream_shape_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_secret = env::var("AUTH_SECRET").map_err(|_| ConfigError::MissingAuthSecret)?;

        let token_ttl_secs = env::var("TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidTokenTtl)?;

        let upstream_shape_url =
            env::var("UPSTREAM_SHAPE_URL").map_err(|_| ConfigError::MissingUpstreamShapeUrl)?;

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            token_ttl_secs,
            upstream_shape_url,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("AUTH_SECRET environment variable is required")]
    MissingAuthSecret,

    #[error("UPSTREAM_SHAPE_URL environment variable is required")]
    MissingUpstreamShapeUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid TOKEN_TTL_SECS value")]
    InvalidTokenTtl,
}
