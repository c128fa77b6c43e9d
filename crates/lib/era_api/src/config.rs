//! API server configuration.

use chrono::Duration;
use era_core::config::{
    APPLE_ISSUER, APPLE_JWKS_URL, AuthConfig, DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
    DEFAULT_REFRESH_TOKEN_TTL_DAYS,
};
use thiserror::Error;

/// Environment configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a positive number within range: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "0.0.0.0:8080").
    pub bind_addr: String,
    /// HS256 secret for access tokens.
    pub jwt_secret: String,
    /// Expected audience of identity tokens.
    pub apple_bundle_id: String,
    pub apple_issuer: String,
    pub apple_jwks_url: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::Missing(name))
}

/// Upper bound for `JWT_ACCESS_EXPIRY_MINUTES` (one day).
const MAX_ACCESS_EXPIRY_MINUTES: i64 = 24 * 60;

/// Upper bound for `JWT_REFRESH_EXPIRY_DAYS` (ten years).
const MAX_REFRESH_EXPIRY_DAYS: i64 = 3650;

/// Parse a positive integer no larger than `max`.
fn number(name: &'static str, default: i64, max: i64) -> Result<i64, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<i64>() {
            Ok(n) if (1..=max).contains(&n) => Ok(n),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                    | Default                               |
    /// |-----------------------------|---------------------------------------|
    /// | `BIND_ADDR`                 | `0.0.0.0:8080`                        |
    /// | `JWT_SECRET`                | required                              |
    /// | `APPLE_BUNDLE_ID`           | required                              |
    /// | `APPLE_ISSUER`              | `https://appleid.apple.com`           |
    /// | `APPLE_JWKS_URL`            | `https://appleid.apple.com/auth/keys` |
    /// | `JWT_ACCESS_EXPIRY_MINUTES` | `15`                                  |
    /// | `JWT_REFRESH_EXPIRY_DAYS`   | `30`                                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            jwt_secret: required("JWT_SECRET")?,
            apple_bundle_id: required("APPLE_BUNDLE_ID")?,
            apple_issuer: var("APPLE_ISSUER").unwrap_or_else(|| APPLE_ISSUER.into()),
            apple_jwks_url: var("APPLE_JWKS_URL").unwrap_or_else(|| APPLE_JWKS_URL.into()),
            access_token_ttl: Duration::minutes(number(
                "JWT_ACCESS_EXPIRY_MINUTES",
                DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
                MAX_ACCESS_EXPIRY_MINUTES,
            )?),
            refresh_token_ttl: Duration::days(number(
                "JWT_REFRESH_EXPIRY_DAYS",
                DEFAULT_REFRESH_TOKEN_TTL_DAYS,
                MAX_REFRESH_EXPIRY_DAYS,
            )?),
        })
    }

    /// Core auth settings derived from this configuration.
    pub fn auth_config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(self.jwt_secret.clone());
        config.identity_issuer = self.apple_issuer.clone();
        config.jwks_url = self.apple_jwks_url.clone();
        config.access_token_ttl = self.access_token_ttl;
        config.refresh_token_ttl = self.refresh_token_ttl;
        config
    }
}
