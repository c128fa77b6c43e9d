//! Auth core configuration.
//!
//! Everything is supplied once when the [`SessionService`] is built; there is
//! no runtime reconfiguration.
//!
//! [`SessionService`]: crate::auth::session::SessionService

use chrono::Duration;

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 15;

/// Refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Apple rotates signing keys rarely; refetch at most once a day.
pub const DEFAULT_JWKS_CACHE_TTL_HOURS: i64 = 24;

/// Upper bound on a single JWKS fetch.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECS: u64 = 10;

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Domain used to synthesize an email when Apple withholds one.
pub const APPLE_PRIVATE_RELAY_DOMAIN: &str = "privaterelay.appleid.com";

pub const MIN_PASSWORD_LEN: usize = 8;

/// Configuration consumed by the session service and its collaborators.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 secret for access tokens.
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Expected `iss` of identity tokens.
    pub identity_issuer: String,
    pub jwks_url: String,
    pub jwks_cache_ttl: Duration,
    pub jwks_fetch_timeout: std::time::Duration,
    pub min_password_len: usize,
    pub bcrypt_cost: u32,
    pub placeholder_email_domain: String,
    /// Revoke every outstanding refresh token of a user whose revoked token
    /// is presented again.
    pub revoke_all_on_reuse: bool,
}

impl AuthConfig {
    /// Build a config with the given secret and defaults for everything
    /// else. The identity token audience is supplied per sign-in.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl: Duration::minutes(DEFAULT_ACCESS_TOKEN_TTL_MINUTES),
            refresh_token_ttl: Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            identity_issuer: APPLE_ISSUER.to_string(),
            jwks_url: APPLE_JWKS_URL.to_string(),
            jwks_cache_ttl: Duration::hours(DEFAULT_JWKS_CACHE_TTL_HOURS),
            jwks_fetch_timeout: std::time::Duration::from_secs(DEFAULT_JWKS_FETCH_TIMEOUT_SECS),
            min_password_len: MIN_PASSWORD_LEN,
            bcrypt_cost: crate::auth::password::BCRYPT_COST,
            placeholder_email_domain: APPLE_PRIVATE_RELAY_DOMAIN.to_string(),
            revoke_all_on_reuse: true,
        }
    }
}
