//! # era_core
//!
//! Authentication and token-lifecycle core for EraCheck.
//!
//! - [`identity`]: Sign in with Apple identity-token verification backed by
//!   a cached JWKS.
//! - [`auth`]: password hashing, access/refresh token issuance, and the
//!   [`auth::session::SessionService`] that composes them.
//! - [`store`]: the [`store::CredentialStore`] contract plus in-memory and
//!   PostgreSQL implementations.

pub mod auth;
pub mod config;
pub mod identity;
pub mod models;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
