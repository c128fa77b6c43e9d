//! Identity provider signing keys (JWKS) with a time-bounded cache.
//!
//! The whole key set shares one expiry. A miss or an expired set triggers a
//! single refetch that replaces the set wholesale; readers see either the old
//! or the new set, never a mix.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use super::KeySetError;

/// Maximum JWKS response size (512 KB).
const MAX_JWKS_SIZE: usize = 512 * 1024;

/// JWKS document (RFC 7517).
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// One entry of a JWKS document. Only the fields needed to build a
/// verification key are read.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
    /// EC X coordinate (base64url).
    #[serde(default)]
    pub x: Option<String>,
    /// EC Y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Build a verification key from the RSA or EC parameters.
    pub fn decoding_key(&self) -> Result<DecodingKey, String> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or("RSA JWK missing 'n'")?;
                let e = self.e.as_deref().ok_or("RSA JWK missing 'e'")?;
                DecodingKey::from_rsa_components(n, e).map_err(|e| format!("bad RSA key: {e}"))
            }
            "EC" => {
                let x = self.x.as_deref().ok_or("EC JWK missing 'x'")?;
                let y = self.y.as_deref().ok_or("EC JWK missing 'y'")?;
                DecodingKey::from_ec_components(x, y).map_err(|e| format!("bad EC key: {e}"))
            }
            other => Err(format!("unsupported key type: {other}")),
        }
    }
}

/// Parse every usable entry of `set` into `kid → key`. Entries without a
/// `kid` or with unparseable parameters are skipped.
pub fn parse_key_set(set: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::with_capacity(set.keys.len());
    for jwk in &set.keys {
        let Some(kid) = jwk.kid.as_deref() else {
            debug!(kty = %jwk.kty, "skipping JWK without kid");
            continue;
        };
        match jwk.decoding_key() {
            Ok(key) => {
                keys.insert(kid.to_string(), key);
            }
            Err(reason) => debug!(kid, %reason, "skipping unusable JWK"),
        }
    }
    keys
}

/// Where the key set comes from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, KeySetError>;
}

/// Fetches the key set over HTTPS with a bounded timeout.
pub struct HttpKeySetSource {
    client: Client,
    url: Url,
}

impl HttpKeySetSource {
    pub fn new(url: &str, timeout: std::time::Duration) -> Result<Self, KeySetError> {
        let url = Url::parse(url)
            .map_err(|e| KeySetError::Upstream(format!("invalid JWKS URL '{url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| KeySetError::Upstream(format!("HTTP client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet, KeySetError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| KeySetError::Upstream(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(KeySetError::Upstream(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| KeySetError::Upstream(format!("Failed to read response: {e}")))?;
        if bytes.len() > MAX_JWKS_SIZE {
            return Err(KeySetError::Upstream(format!(
                "Response too large: {} bytes (max {MAX_JWKS_SIZE})",
                bytes.len()
            )));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| KeySetError::Upstream(format!("Failed to parse JWKS: {e}")))
    }
}

/// An immutable snapshot of the key set.
struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    expires_at: DateTime<Utc>,
}

impl CachedKeys {
    fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn fresh_key(&self, kid: &str) -> Option<DecodingKey> {
        if Utc::now() < self.expires_at {
            self.keys.get(kid).cloned()
        } else {
            None
        }
    }
}

/// Signing keys of one identity provider, cached for `ttl`.
pub struct KeySetCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    current: RwLock<Arc<CachedKeys>>,
    /// Serializes refetches; waiters re-check the cache before fetching.
    refetch: Mutex<()>,
}

impl KeySetCache {
    pub fn new(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            current: RwLock::new(Arc::new(CachedKeys::empty())),
            refetch: Mutex::new(()),
        }
    }

    /// Return the key for `kid`, refetching the set at most once when it is
    /// missing or expired.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, KeySetError> {
        if let Some(key) = self.snapshot().await.fresh_key(kid) {
            return Ok(key);
        }

        let _guard = self.refetch.lock().await;
        if let Some(key) = self.snapshot().await.fresh_key(kid) {
            return Ok(key);
        }

        let refreshed = self.refresh().await?;
        refreshed.keys.get(kid).cloned().ok_or_else(|| {
            warn!(kid, "identity token signed with unknown key");
            KeySetError::NotFound(kid.to_string())
        })
    }

    /// Key ids currently cached, expired or not.
    pub async fn cached_kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.snapshot().await.keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    async fn snapshot(&self) -> Arc<CachedKeys> {
        Arc::clone(&*self.current.read().await)
    }

    /// Fetch, parse and swap in a new key set. The old set stays in place if
    /// anything fails.
    async fn refresh(&self) -> Result<Arc<CachedKeys>, KeySetError> {
        let set = self.source.fetch().await?;
        let keys = parse_key_set(&set);
        if keys.is_empty() {
            return Err(KeySetError::Upstream("JWKS contained no usable keys".into()));
        }

        let fresh = Arc::new(CachedKeys {
            keys,
            expires_at: Utc::now() + self.ttl,
        });
        *self.current.write().await = Arc::clone(&fresh);
        info!(keys = fresh.keys.len(), "refreshed identity provider signing keys");
        Ok(fresh)
    }
}
