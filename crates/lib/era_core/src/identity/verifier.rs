//! Identity token verification.
//!
//! Checks run in a fixed order and stop at the first failure: shape, header
//! algorithm, signing key, claims (issuer, audience, expiry), then the
//! signature over `header.payload`.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::jwks::KeySetCache;
use super::{IdentityClaims, VerificationError};

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, VerificationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerificationError::Malformed(format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerificationError::Malformed(format!("{what} is not valid JSON: {e}")))
}

/// Verifies identity tokens issued by one provider.
pub struct IdentityTokenVerifier {
    keys: Arc<KeySetCache>,
    issuer: String,
    algorithm: Algorithm,
}

impl IdentityTokenVerifier {
    /// Verifier for RS256 tokens from `issuer`.
    pub fn new(keys: Arc<KeySetCache>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            algorithm: Algorithm::RS256,
        }
    }

    /// Verify `token` and return its claims if it was issued by this
    /// verifier's provider for `expected_audience`.
    pub async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<IdentityClaims, VerificationError> {
        let segments: Vec<&str> = token.split('.').collect();
        let &[header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(VerificationError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header: TokenHeader = decode_segment(header_b64, "header")?;
        let declared = Algorithm::from_str(&header.alg)
            .map_err(|_| VerificationError::UnsupportedAlgorithm(header.alg.clone()))?;
        if declared != self.algorithm {
            return Err(VerificationError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerificationError::Malformed("header has no kid".into()))?;

        let key = self.keys.get_key(&kid).await?;

        let claims: IdentityClaims = decode_segment(payload_b64, "payload")?;
        if claims.iss != self.issuer {
            return Err(VerificationError::InvalidIssuer(claims.iss));
        }
        if claims.aud != expected_audience {
            return Err(VerificationError::InvalidAudience(claims.aud));
        }
        if Utc::now().timestamp() >= claims.exp {
            return Err(VerificationError::Expired);
        }

        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        match jsonwebtoken::crypto::verify(
            signature_b64,
            signing_input.as_bytes(),
            &key,
            self.algorithm,
        ) {
            Ok(true) => Ok(claims),
            _ => Err(VerificationError::InvalidSignature),
        }
    }
}
