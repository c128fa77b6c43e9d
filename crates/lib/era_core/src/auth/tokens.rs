//! Token pair issuance.
//!
//! Access tokens are stateless JWTs. Refresh tokens are 32 random bytes,
//! base64url-encoded; only their SHA-256 hash reaches the store.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::AuthError;
use super::jwt::{generate_access_token, verify_access_token};
use crate::models::auth::{AccessTokenClaims, AuthResponse, AuthUser, User};
use crate::store::CredentialStore;

/// Number of random bytes in a refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random refresh token.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a refresh token for storage (lowercase hex).
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mints access/refresh pairs.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Issue a new token pair for `user`.
    ///
    /// The access token is minted first so that a store failure while
    /// persisting the refresh record yields no credentials at all.
    pub async fn issue_pair(
        &self,
        store: &dyn CredentialStore,
        user: &User,
    ) -> Result<AuthResponse, AuthError> {
        let access_token = generate_access_token(user, &self.secret, self.access_ttl)?;
        let refresh_token = generate_refresh_token();
        let token_hash = hash_refresh_token(&refresh_token);

        let expires_at = Utc::now()
            .checked_add_signed(self.refresh_ttl)
            .ok_or_else(|| AuthError::Internal("refresh token lifetime out of range".into()))?;
        let record = store
            .create_refresh_record(user.id, &token_hash, expires_at)
            .await?;
        debug!(user_id = %user.id, record_id = %record.id, "issued token pair");

        Ok(AuthResponse {
            access_token,
            refresh_token,
            user: AuthUser::from(user),
        })
    }

    /// Verify an access token minted by this issuer.
    pub fn verify_access_token(&self, token: &str) -> Option<AccessTokenClaims> {
        verify_access_token(token, &self.secret)
    }
}
