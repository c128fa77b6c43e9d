//! Shared fixtures: an RSA signing key whose public half is served as the
//! identity provider's JWKS, plus a session service wired to them.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use era_core::auth::session::SessionService;
use era_core::config::{APPLE_ISSUER, AuthConfig};
use era_core::identity::KeySetError;
use era_core::identity::jwks::{JwkSet, KeySetCache, KeySetSource};
use era_core::identity::verifier::IdentityTokenVerifier;
use era_core::store::CredentialStore;
use era_core::store::memory::MemoryCredentialStore;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

pub const BUNDLE_ID: &str = "com.eracheck.app";
pub const KID: &str = "test-kid-1";
pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/identity_rsa.pem");
pub const JWKS_JSON: &str = include_str!("../fixtures/identity_jwks.json");

/// Serves the fixture JWKS and counts fetches.
pub struct StaticKeySource {
    set: JwkSet,
    calls: AtomicUsize,
}

impl StaticKeySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            set: serde_json::from_str(JWKS_JSON).expect("fixture JWKS parses"),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet, KeySetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.set.clone())
    }
}

pub fn verifier(source: Arc<StaticKeySource>) -> Arc<IdentityTokenVerifier> {
    let cache = Arc::new(KeySetCache::new(source, Duration::hours(24)));
    Arc::new(IdentityTokenVerifier::new(cache, APPLE_ISSUER))
}

/// Claims of a valid identity token for `sub`, expiring in ten minutes.
pub fn identity_claims(sub: &str, email: Option<&str>) -> Value {
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": APPLE_ISSUER,
        "sub": sub,
        "aud": BUNDLE_ID,
        "iat": now,
        "exp": now + 600,
    });
    if let Some(email) = email {
        claims["email"] = json!(email);
    }
    claims
}

pub fn signing_key() -> EncodingKey {
    EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).expect("fixture key parses")
}

/// Sign `claims` as RS256 with the fixture key under [`KID`].
pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(&header, claims, &signing_key()).expect("sign identity token")
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::new("test-secret");
    // Minimum bcrypt cost keeps the suite fast.
    config.bcrypt_cost = 4;
    config
}

pub fn service_with(config: AuthConfig, store: Arc<dyn CredentialStore>) -> SessionService {
    SessionService::new(config, store, verifier(StaticKeySource::new()))
}

pub fn service(store: Arc<MemoryCredentialStore>) -> SessionService {
    service_with(test_config(), store)
}
