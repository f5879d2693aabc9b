//! Bearer-token extractor.
//!
//! Every protected route takes an [`AuthUser`] parameter; extraction
//! verifies the JWT against the configured secret and rejects with 401
//! before the handler body runs.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use super::{extract_bearer_token, verify_token, Claims};
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        let token = extract_bearer_token(header).ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid authorization header format",
        ))?;

        match verify_token(&state.config.auth_secret, token) {
            Ok(claims) => Ok(AuthUser { claims }),
            Err(e) => {
                tracing::debug!("Token rejected: {}", e);
                Err((StatusCode::UNAUTHORIZED, "Invalid or expired token"))
            }
        }
    }
}
