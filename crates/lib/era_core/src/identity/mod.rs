//! Third-party identity assertions (Sign in with Apple).
//!
//! [`jwks::KeySetCache`] holds the provider's public signing keys;
//! [`verifier::IdentityTokenVerifier`] checks identity tokens against them.
//! Neither touches the credential store.

pub mod jwks;
pub mod verifier;

use serde::Deserialize;
use thiserror::Error;

/// Errors from fetching or reading the provider's key set.
#[derive(Debug, Error)]
pub enum KeySetError {
    #[error("No signing key with kid '{0}'")]
    NotFound(String),

    #[error("JWKS fetch failed: {0}")]
    Upstream(String),
}

/// Identity token verification failures.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Malformed identity token: {0}")]
    Malformed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No signing key with kid '{0}'")]
    KeyNotFound(String),

    #[error("Key set unavailable: {0}")]
    Upstream(String),

    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    #[error("Identity token expired")]
    Expired,

    #[error("Signature verification failed")]
    InvalidSignature,
}

impl From<KeySetError> for VerificationError {
    fn from(e: KeySetError) -> Self {
        match e {
            KeySetError::NotFound(kid) => VerificationError::KeyNotFound(kid),
            KeySetError::Upstream(msg) => VerificationError::Upstream(msg),
        }
    }
}

/// Verified claims of an identity token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    /// Stable provider-side user id.
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}
