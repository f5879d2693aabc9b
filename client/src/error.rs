//! Sync error taxonomy.
//!
//! Each class has a distinct fate: validation failures are never retried,
//! auth failures get exactly one fresh-token retry per pass, network
//! failures ride the backoff path until the outbox dead-letters the entry,
//! and nothing in here is allowed to take the local application down.

use thiserror::Error;

/// Errors from the client half of the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed change record or changeset. Surfaced immediately,
    /// never retried.
    #[error("validation failed: {0}")]
    Validation(#[from] ferry_engine::Error),

    /// Expired or rejected credential. Distinct from connectivity loss so
    /// "not allowed to sync" never reads as "can't reach server".
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connectivity or timeout. Retried with exponential backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Local and remote disagree about applied state. Reported, never
    /// merged around; retrying cannot fix it.
    #[error("integrity check failed: {0}")]
    Integrity(ferry_engine::Error),

    /// Local store failure.
    #[error("local database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Anything else. Logged, pauses the batch, never crashes the pipeline.
    #[error("sync failed: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Whether the backoff loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Unknown(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
