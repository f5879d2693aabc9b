//! Shape proxy handler - forwards subscription requests upstream.
//!
//! The upstream change-stream service does the actual log work; this
//! handler only enforces the token's shape grant, forwards the request,
//! and mirrors the response back with the cursor headers intact so the
//! client can resume where it left off. The body is streamed through
//! without buffering.

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use serde::Deserialize;

use crate::auth::Claims;
use crate::error::{AppError, Result};
use crate::AppState;
use ferry_engine::TableKind;

/// Cursor and content headers mirrored from the upstream response.
const FORWARDED_HEADERS: &[&str] = &[
    "shape-offset",
    "shape-handle",
    "shape-schema",
    "content-type",
];

/// Query parameters for a shape subscription.
#[derive(Debug, Deserialize)]
pub struct ShapeQuery {
    pub table: String,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    /// Comma-separated column list; absent means all columns.
    #[serde(default)]
    pub columns: Option<String>,
}

/// Split a comma-separated column list.
pub fn parse_columns(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    })
}

/// Forward a shape request upstream and stream the response back.
pub async fn handle_shape(
    state: &AppState,
    claims: &Claims,
    query: ShapeQuery,
) -> Result<Response<Body>> {
    let table = TableKind::parse(&query.table)?;
    let columns = parse_columns(query.columns.as_deref());

    if !claims.allows_shape(table.as_str(), columns.as_deref()) {
        return Err(AppError::Unauthorized(format!(
            "token grant does not cover shape {table}"
        )));
    }

    let mut params: Vec<(&str, String)> = vec![("table", query.table.clone())];
    if let Some(offset) = &query.offset {
        params.push(("offset", offset.clone()));
    }
    if let Some(handle) = &query.handle {
        params.push(("handle", handle.clone()));
    }
    if let Some(columns) = &query.columns {
        params.push(("columns", columns.clone()));
    }

    let upstream = state
        .http
        .get(format!("{}/v1/shape", state.config.upstream_shape_url))
        .query(&params)
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    tracing::debug!(%table, status = %status, "forwarded shape request");

    let mut builder = Response::builder().status(status);
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.headers().get(*name) {
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                builder = builder.header(*name, value);
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(e.to_string()))
}
