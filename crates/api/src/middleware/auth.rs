//! JWT authentication helpers.
//!
//! Tokens are issued by the identity service; this crate only verifies them.
//! HTTP routes take an [`AuthUser`] extractor that validates the
//! `Authorization: Bearer <token>` header. WebSocket clients send the same
//! token in their first frame instead; see [`verify_token`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_notifier::protocol::AuthFailure;

use crate::state::AppState;

/// JWT claims stored in the token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: the recipient UUID
    pub sub: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// Authenticated recipient extracted from the JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Decode and validate a JWT token.
pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

/// Resolve a token to its recipient, telling expiry apart from every other
/// failure so a client knows whether refreshing its token can help.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AuthFailure> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthFailure::Expired,
        _ => AuthFailure::Invalid,
    })?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| AuthFailure::Invalid)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let secret = state.config.jwt_secret.clone();

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move {
            let Some(token) = auth_header
                .as_deref()
                .and_then(|auth| auth.strip_prefix("Bearer "))
            else {
                return Err(AppError::Auth(
                    "Missing or invalid Authorization header. Use 'Bearer <JWT>'".to_string(),
                ));
            };

            let claims = decode_jwt(token, &secret)?;
            let user_id = Uuid::parse_str(&claims.sub)
                .map_err(|_| AppError::Auth("Invalid user ID in token".to_string()))?;
            Ok(AuthUser { user_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};

    const TEST_SECRET: &str = "test-secret-key-for-unit-tests";

    fn token_with_expiry(user_id: Uuid, secret: &str, expires_in: Duration) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + expires_in).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn encode_jwt(user_id: Uuid, secret: &str, expiry_hours: i64) -> String {
        token_with_expiry(user_id, secret, Duration::hours(expiry_hours))
    }

    fn expired_token(user_id: Uuid) -> String {
        token_with_expiry(user_id, TEST_SECRET, Duration::hours(-1))
    }

    #[test]
    fn test_encode_decode_jwt() {
        let user_id = Uuid::new_v4();
        let token = encode_jwt(user_id, TEST_SECRET, 24);
        let claims = decode_jwt(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let token = encode_jwt(Uuid::new_v4(), TEST_SECRET, 24);
        assert!(decode_jwt(&token, "wrong-secret").is_err());
    }

    #[test]
    fn test_expired_jwt_rejected() {
        let token = expired_token(Uuid::new_v4());
        assert!(decode_jwt(&token, TEST_SECRET).is_err());
    }

    #[test]
    fn test_verify_token_resolves_recipient() {
        let user_id = Uuid::new_v4();
        let token = encode_jwt(user_id, TEST_SECRET, 1);
        assert_eq!(verify_token(&token, TEST_SECRET), Ok(user_id));
    }

    #[test]
    fn test_verify_token_reports_expiry() {
        let token = expired_token(Uuid::new_v4());
        assert_eq!(verify_token(&token, TEST_SECRET), Err(AuthFailure::Expired));
    }

    #[test]
    fn test_verify_token_garbage_is_invalid() {
        assert_eq!(
            verify_token("not.a.valid.jwt", TEST_SECRET),
            Err(AuthFailure::Invalid)
        );
        let token = encode_jwt(Uuid::new_v4(), TEST_SECRET, 1);
        assert_eq!(verify_token(&token, "other"), Err(AuthFailure::Invalid));
    }
}
