//! Apply-gateway client.
//!
//! One POST per batch; the gateway applies the whole changeset in a
//! single remote transaction, so from here a batch either fully lands or
//! fully fails. The status mapping is the retry policy's input: 400 is a
//! validation bug and never retried, 401 means refresh the token, 5xx
//! and transport failures ride the backoff path.

use crate::error::{Result, SyncError};
use ferry_engine::Changeset;
use std::future::Future;
use tracing::debug;

/// Remote application of a changeset.
pub trait Gateway: Send + Sync {
    fn apply(
        &self,
        changes: &Changeset,
        token: &str,
    ) -> impl Future<Output = Result<ApplyAck>> + Send;
}

/// What the gateway reports back for an applied batch. The fingerprint
/// covers the ids the gateway actually committed, so the bulk-load path
/// can prove convergence instead of assuming it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApplyAck {
    #[serde(default)]
    pub applied: u64,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// HTTP gateway client.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Gateway client with the configured request timeout applied.
    pub fn from_config(
        config: &crate::config::ClientConfig,
    ) -> std::result::Result<Self, crate::config::ConfigError> {
        Ok(Self::new(config.http_client()?, config.gateway_url.clone()))
    }
}

impl Gateway for HttpGateway {
    async fn apply(&self, changes: &Changeset, token: &str) -> Result<ApplyAck> {
        let response = self
            .http
            .post(format!("{}/apply-changes", self.base_url))
            .bearer_auth(token)
            .json(changes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let ack: ApplyAck = response.json().await?;
            debug!(records = changes.len(), applied = ack.applied, "batch applied");
            return Ok(ack);
        }

        let detail = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| status.to_string());

        match status.as_u16() {
            400 => Err(SyncError::Validation(
                ferry_engine::Error::InvalidPayload(detail),
            )),
            401 | 403 => Err(SyncError::Auth(detail)),
            _ => Err(SyncError::Network(format!("gateway returned {status}: {detail}"))),
        }
    }
}
