//! Authentication and session lifecycle.
//!
//! Provides password hashing, access-token JWTs, refresh-token issuance and
//! the [`session::SessionService`] that ties them to a credential store.

pub mod jwt;
pub mod password;
pub mod session;
pub mod tokens;

use thiserror::Error;

use crate::identity::VerificationError;
use crate::store::StoreError;

/// Authentication errors.
///
/// `CredentialError` and `NotFound` intentionally carry no detail: they are
/// shown to clients as-is and must not reveal which emails or tokens exist.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    CredentialError,

    #[error("Token expired")]
    Expired,

    #[error("Not found")]
    NotFound,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            other => AuthError::Store(other),
        }
    }
}

impl From<VerificationError> for AuthError {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::Malformed(msg) => AuthError::ValidationError(msg),
            VerificationError::Expired => AuthError::Expired,
            VerificationError::Upstream(msg) => AuthError::Upstream(msg),
            VerificationError::UnsupportedAlgorithm(_)
            | VerificationError::KeyNotFound(_)
            | VerificationError::InvalidIssuer(_)
            | VerificationError::InvalidAudience(_)
            | VerificationError::InvalidSignature => AuthError::CredentialError,
        }
    }
}
