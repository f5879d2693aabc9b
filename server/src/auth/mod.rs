//! Token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying a subject, expiry, and a shape grant
//! naming the tables (and optionally columns) the bearer may read
//! through the stream proxy. The apply gateway only checks validity; the
//! proxy additionally checks the grant against the requested shape.

mod middleware;

pub use middleware::AuthUser;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// One table the token is allowed to subscribe to. `columns: None` means
/// every column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeGrant {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Signed token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier
    pub sub: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Tables/columns this token may read via the shape proxy
    #[serde(default)]
    pub shapes: Vec<ShapeGrant>,
}

impl Claims {
    /// Whether the grant covers a subscription to `table` reading
    /// `columns` (`None` = all columns, only allowed by an unrestricted
    /// grant).
    pub fn allows_shape(&self, table: &str, columns: Option<&[String]>) -> bool {
        self.shapes.iter().any(|grant| {
            if grant.table != table {
                return false;
            }
            match (&grant.columns, columns) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(granted), Some(requested)) => {
                    requested.iter().all(|c| granted.contains(c))
                }
            }
        })
    }
}

/// Sign a new token.
pub fn issue_token(
    secret: &str,
    sub: &str,
    ttl_secs: i64,
    shapes: Vec<ShapeGrant>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        shapes,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a token's signature and expiry, returning its claims.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo_grant() -> Vec<ShapeGrant> {
        vec![ShapeGrant {
            table: "todos".to_string(),
            columns: Some(vec!["id".to_string(), "title".to_string()]),
        }]
    }

    #[test]
    fn issued_tokens_verify_and_round_trip_claims() {
        let token = issue_token("secret", "u1", 3600, todo_grant()).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.shapes.len(), 1);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", "u1", 3600, vec![]).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        // jsonwebtoken's default validation has 60s leeway
        let token = issue_token("secret", "u1", -120, vec![]).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn shape_grant_scopes_table_and_columns() {
        let claims = Claims {
            sub: "u1".to_string(),
            iat: 0,
            exp: 0,
            shapes: todo_grant(),
        };

        let requested = vec!["id".to_string(), "title".to_string()];
        assert!(claims.allows_shape("todos", Some(&requested)));

        let too_wide = vec!["id".to_string(), "completed".to_string()];
        assert!(!claims.allows_shape("todos", Some(&too_wide)));

        // column-restricted grant never covers "all columns"
        assert!(!claims.allows_shape("todos", None));
        assert!(!claims.allows_shape("lists", Some(&requested)));
    }

    #[test]
    fn unrestricted_grant_covers_everything_on_its_table() {
        let claims = Claims {
            sub: "u1".to_string(),
            iat: 0,
            exp: 0,
            shapes: vec![ShapeGrant {
                table: "lists".to_string(),
                columns: None,
            }],
        };
        assert!(claims.allows_shape("lists", None));
        assert!(claims.allows_shape("lists", Some(&["name".to_string()])));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer  abc "), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }
}
