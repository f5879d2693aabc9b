//! Token acquisition and caching.
//!
//! One token serves the whole client. Acquisition is single-flight: the
//! cache slot's async mutex is held across the network fetch, so
//! concurrent callers finding the slot empty line up behind one request
//! instead of stampeding the issuer. A 401 from any API call invalidates
//! the slot; the next caller fetches fresh.

use crate::error::{Result, SyncError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Refresh this long before the recorded expiry, so a token never dies
/// mid-request.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

/// A bearer token plus its expiry, when the issuer encodes one.
#[derive(Clone)]
pub struct AuthToken {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Still usable at `now`, with leeway. Tokens without a recorded
    /// expiry are trusted until explicitly invalidated.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + EXPIRY_LEEWAY < expires_at,
            None => true,
        }
    }
}

// Keep the credential out of logs.
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of fresh tokens.
pub trait TokenFetcher: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<AuthToken>> + Send;
}

/// Caches one token and refreshes it single-flight.
pub struct TokenManager<F> {
    fetcher: F,
    slot: Mutex<Option<AuthToken>>,
}

impl<F: TokenFetcher> TokenManager<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            slot: Mutex::new(None),
        }
    }

    /// A valid token, fetching one if the cached token is missing or
    /// stale. The slot lock is held across the fetch: that is the
    /// single-flight guarantee.
    pub async fn token(&self) -> Result<AuthToken> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
            debug!("cached token expired, refreshing");
        }
        let fresh = self.fetcher.fetch().await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached token after a 401. The next `token()` call fetches
    /// fresh.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        *slot = None;
    }
}

/// Fetches tokens from the issuer endpoint over HTTP.
#[derive(Clone)]
pub struct HttpTokenFetcher {
    http: reqwest::Client,
    issuer_url: String,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    token: String,
}

impl HttpTokenFetcher {
    pub fn new(http: reqwest::Client, issuer_url: String) -> Self {
        Self { http, issuer_url }
    }

    /// Fetcher with the configured request timeout applied.
    pub fn from_config(
        config: &crate::config::ClientConfig,
    ) -> std::result::Result<Self, crate::config::ConfigError> {
        Ok(Self::new(config.http_client()?, config.issuer_url.clone()))
    }
}

impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self) -> Result<AuthToken> {
        let response = self
            .http
            .get(format!("{}/auth/token", self.issuer_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SyncError::Auth(format!(
                "token issuer returned {}",
                response.status()
            )));
        }
        let body: TokenResponse = response.json().await?;
        let expires_at = decode_expiry(&body.token);
        debug!(?expires_at, "fetched token");
        Ok(AuthToken::new(body.token, expires_at))
    }
}

/// Pull the `exp` claim out of a JWT payload without verifying the
/// signature; the client only needs it to schedule refreshes.
fn decode_expiry(jwt: &str) -> Option<DateTime<Utc>> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}
