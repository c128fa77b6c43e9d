//! Authentication domain models.
//!
//! These are internal domain models. The wire shapes returned to clients are
//! [`AuthResponse`] and [`AuthUser`]; everything else stays server-side.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a user authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Email + password.
    Password,
    /// Sign in with Apple (or another federated identity provider).
    Federated,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Password => "password",
            AuthProvider::Federated => "federated",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(AuthProvider::Password),
            "federated" => Ok(AuthProvider::Federated),
            other => Err(format!("unknown auth provider: {other}")),
        }
    }
}

/// Domain user. Tombstoned users are never returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// bcrypt hash; `None` for federated-only users.
    pub password_hash: Option<String>,
    /// Federated `sub` claim. Set once, never reassigned.
    pub federated_subject_id: Option<String>,
    pub auth_provider: AuthProvider,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_federated(&self) -> bool {
        self.auth_provider == AuthProvider::Federated
    }
}

/// Fields for a user about to be created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub federated_subject_id: Option<String>,
    pub auth_provider: AuthProvider,
    pub display_name: Option<String>,
}

/// Partial update for an existing user. `None` leaves a field untouched.
///
/// `federated_subject_id` is only applied when the stored value is still
/// empty.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub federated_subject_id: Option<String>,
    pub auth_provider: Option<AuthProvider>,
}

/// Refresh token record. Only the SHA-256 hash of the raw secret is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    pub email: String,
    pub is_federated_user: bool,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

/// Public view of a user, returned alongside every token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub is_federated_user: bool,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            is_federated_user: user.is_federated(),
        }
    }
}

/// Result of every successful authentication: a fresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AuthUser,
}
