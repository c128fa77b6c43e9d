//! Access token (HS256 JWT) generation and verification.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use super::AuthError;
use crate::models::auth::{AccessTokenClaims, User};

/// Generate a signed access token for `user`, valid for `ttl`.
pub fn generate_access_token(
    user: &User,
    secret: &[u8],
    ttl: Duration,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let exp = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal("access token lifetime out of range".into()))?;
    let claims = AccessTokenClaims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        is_federated_user: user.is_federated(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

/// Verify an access token, returning the claims on success.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Option<AccessTokenClaims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    decode::<AccessTokenClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}
