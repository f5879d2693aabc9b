//! Shape-stream consumer.
//!
//! Subscribes to a filtered slice of the remote change history through
//! the proxy and applies each row event to the local store with
//! `Origin::Remote`, feeding the echo-suppression rule. The cursor
//! (`shape-offset` plus the opaque `shape-handle`) comes back in response
//! headers; carrying it into the next request resumes exactly where the
//! previous poll left off.

use crate::auth::{TokenFetcher, TokenManager};
use crate::error::{Result, SyncError};
use crate::local::LocalStore;
use ferry_engine::{RecordChange, TableKind};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Initial offset meaning "the beginning of the shape log".
pub const OFFSET_START: &str = "-1";

const OFFSET_HEADER: &str = "shape-offset";
const HANDLE_HEADER: &str = "shape-handle";

/// Resumption point within a shape log.
#[derive(Debug, Clone)]
pub struct ShapeCursor {
    pub offset: String,
    pub handle: Option<String>,
}

impl Default for ShapeCursor {
    fn default() -> Self {
        Self {
            offset: OFFSET_START.to_string(),
            handle: None,
        }
    }
}

impl ShapeCursor {
    /// Pick up the new cursor from a poll's response headers. Headers the
    /// proxy didn't forward leave the old values in place.
    fn advance(&mut self, headers: &HeaderMap) {
        if let Some(offset) = headers.get(OFFSET_HEADER).and_then(|v| v.to_str().ok()) {
            self.offset = offset.to_string();
        }
        if let Some(handle) = headers.get(HANDLE_HEADER).and_then(|v| v.to_str().ok()) {
            self.handle = Some(handle.to_string());
        }
    }
}

/// One decoded stream event.
#[derive(Debug)]
pub enum ShapeEvent {
    /// A row changed upstream; insert locally, or update when the key is
    /// already present (the echo case included).
    Row(RecordChange),
    /// A row was removed upstream.
    Delete { id: String },
    /// The log has been consumed to its tip.
    UpToDate,
}

#[derive(Deserialize, Default)]
struct MessageHeaders {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    control: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    headers: MessageHeaders,
}

/// Decode one poll's body into events for `table`.
pub fn parse_messages(table: TableKind, body: &str) -> Result<Vec<ShapeEvent>> {
    let raw: Vec<RawMessage> = serde_json::from_str(body)
        .map_err(|e| SyncError::Unknown(format!("malformed shape message batch: {e}")))?;

    let mut events = Vec::with_capacity(raw.len());
    for message in raw {
        if message.headers.control.as_deref() == Some("up-to-date") {
            events.push(ShapeEvent::UpToDate);
            continue;
        }
        let Some(value) = message.value else {
            continue;
        };
        match message.headers.operation.as_deref() {
            Some("insert") | Some("update") => {
                let change = RecordChange::from_json(table, &value.to_string())?;
                events.push(ShapeEvent::Row(change));
            }
            Some("delete") => match value.get("id").and_then(|v| v.as_str()) {
                Some(id) => events.push(ShapeEvent::Delete { id: id.to_string() }),
                None => warn!(%table, "delete event without id, skipping"),
            },
            other => warn!(%table, operation = ?other, "unknown stream operation, skipping"),
        }
    }
    Ok(events)
}

/// What one poll produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollOutcome {
    pub applied: usize,
    pub up_to_date: bool,
}

/// Polls the shape proxy and applies events to the local store.
pub struct ShapeConsumer<F> {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager<F>>,
    store: LocalStore,
    cursor: ShapeCursor,
}

impl<F: TokenFetcher> ShapeConsumer<F> {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        tokens: Arc<TokenManager<F>>,
        store: LocalStore,
    ) -> Self {
        Self {
            http,
            base_url,
            tokens,
            store,
            cursor: ShapeCursor::default(),
        }
    }

    /// Consumer with the configured request timeout applied.
    pub fn from_config(
        config: &crate::config::ClientConfig,
        tokens: Arc<TokenManager<F>>,
        store: LocalStore,
    ) -> std::result::Result<Self, crate::config::ConfigError> {
        Ok(Self::new(
            config.http_client()?,
            config.shape_url.clone(),
            tokens,
            store,
        ))
    }

    pub fn cursor(&self) -> &ShapeCursor {
        &self.cursor
    }

    /// One poll: fetch the next slice of the shape log for `table`, apply
    /// every event with remote origin, and advance the cursor. A rejected
    /// token gets exactly one fresh-token retry.
    pub async fn poll_once(&mut self, table: TableKind) -> Result<PollOutcome> {
        let token = self.tokens.token().await?;
        let response = match self.request(table, token.as_str()).await {
            Err(err) if err.is_auth() => {
                self.tokens.invalidate().await;
                let fresh = self.tokens.token().await?;
                self.request(table, fresh.as_str()).await?
            }
            other => other?,
        };

        self.cursor.advance(response.headers());
        let body = response.text().await?;
        let events = parse_messages(table, &body)?;

        let mut outcome = PollOutcome::default();
        for event in events {
            match event {
                ShapeEvent::Row(change) => {
                    self.store.apply_remote(&change).await?;
                    outcome.applied += 1;
                }
                ShapeEvent::Delete { id } => {
                    self.store.delete_remote(table, &id).await?;
                    outcome.applied += 1;
                }
                ShapeEvent::UpToDate => outcome.up_to_date = true,
            }
        }
        debug!(%table, applied = outcome.applied, offset = %self.cursor.offset, "shape poll");
        Ok(outcome)
    }

    async fn request(&self, table: TableKind, token: &str) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .get(format!("{}/v1/shape", self.base_url))
            .bearer_auth(token)
            .query(&[
                ("table", table.as_str()),
                ("offset", self.cursor.offset.as_str()),
            ]);
        if let Some(handle) = &self.cursor.handle {
            request = request.query(&[("handle", handle.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SyncError::Auth(format!("shape proxy returned {status}")));
        }
        if !status.is_success() {
            return Err(SyncError::Network(format!("shape proxy returned {status}")));
        }
        Ok(response)
    }
}
