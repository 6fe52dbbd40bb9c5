use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentry_core::identity::{Identity, Role};

use crate::error::AppError;
use crate::state::AppState;

pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    iat: i64,
    exp: i64,
}

/// HS256 signing/verification keys derived from `JWT_SECRET`.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a bearer token for a verified account.
    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify a bearer token. Returns `None` on any failure — signature,
    /// expiry, or malformed claims.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).ok()?;
        let subject_id = Uuid::parse_str(&data.claims.sub).ok()?;
        let role = Role::parse(&data.claims.role)?;
        Some(Identity { subject_id, role })
    }
}

/// Authenticated identity extracted from `Authorization: Bearer <jwt>`.
///
/// The identity is an explicit value handed to the domain operations —
/// handlers never read ambient request state.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must use Bearer scheme".to_string(),
            })?;

        state
            .jwt
            .verify(token)
            .map(AuthenticatedUser)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Invalid or expired token".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify_and_carry_the_identity() {
        let keys = JwtKeys::from_secret("test-secret");
        let user_id = Uuid::now_v7();
        let token = keys.issue(user_id, Role::Admin).unwrap();

        let identity = keys.verify(&token).unwrap();
        assert_eq!(identity.subject_id, user_id);
        assert_eq!(identity.role, Role::Admin);
    }

    #[test]
    fn foreign_and_garbage_tokens_are_rejected() {
        let keys = JwtKeys::from_secret("test-secret");
        let other = JwtKeys::from_secret("other-secret");
        let token = other.issue(Uuid::now_v7(), Role::User).unwrap();

        assert!(keys.verify(&token).is_none());
        assert!(keys.verify("not-a-jwt").is_none());
        assert!(keys.verify("").is_none());
    }
}
