//! Sync endpoint routes: the apply gateway, the shape proxy, and the
//! dev token issuer.

use axum::{
    body::Body,
    extract::{Query, State},
    http::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::auth::{self, AuthUser, ShapeGrant};
use crate::error::{AppError, Result};
use crate::handlers::{handle_apply, handle_shape, ApplyResponse, ShapeQuery};
use crate::AppState;
use ferry_engine::{Changeset, TableKind};

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apply-changes", post(apply_handler))
        .route("/v1/shape", get(shape_handler))
        .route("/auth/token", get(token_handler))
}

/// POST /apply-changes - apply a client changeset in one transaction.
async fn apply_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(changes): Json<Changeset>,
) -> Result<Json<ApplyResponse>> {
    let response = handle_apply(&state.pool, changes).await?;
    Ok(Json(response))
}

/// GET /v1/shape - proxy a shape subscription upstream.
async fn shape_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ShapeQuery>,
) -> Result<Response<Body>> {
    handle_shape(&state, &auth.claims, query).await
}

/// Token issuance response.
#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

/// GET /auth/token - development issuer: a token granting every table.
async fn token_handler(State(state): State<AppState>) -> Result<Json<TokenResponse>> {
    let shapes = TableKind::ALL
        .iter()
        .map(|table| ShapeGrant {
            table: table.to_string(),
            columns: None,
        })
        .collect();

    let token = auth::issue_token(
        &state.config.auth_secret,
        "dev",
        state.config.token_ttl_secs,
        shapes,
    )
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(TokenResponse { token }))
}
