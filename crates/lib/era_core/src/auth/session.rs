//! Session service: registration, login, Sign in with Apple, refresh-token
//! rotation, logout and account deletion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::password::{hash_password, validate_password, verify_password};
use super::tokens::{TokenIssuer, hash_refresh_token};
use crate::config::AuthConfig;
use crate::identity::jwks::{HttpKeySetSource, KeySetCache};
use crate::identity::verifier::IdentityTokenVerifier;
use crate::models::auth::{
    AccessTokenClaims, AuthProvider, AuthResponse, NewUser, User, UserUpdate,
};
use crate::store::CredentialStore;

/// Treat blank optional inputs as absent.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Orchestrates every credential flow over a [`CredentialStore`].
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<IdentityTokenVerifier>,
    issuer: TokenIssuer,
    config: AuthConfig,
}

impl SessionService {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<IdentityTokenVerifier>,
    ) -> Self {
        let issuer = TokenIssuer::new(
            config.jwt_secret.as_bytes().to_vec(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        );
        Self {
            store,
            verifier,
            issuer,
            config,
        }
    }

    /// Build the service with an HTTP-backed JWKS cache for the configured
    /// identity provider.
    pub fn from_config(
        config: AuthConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        let source = HttpKeySetSource::new(&config.jwks_url, config.jwks_fetch_timeout)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let keys = Arc::new(KeySetCache::new(Arc::new(source), config.jwks_cache_ttl));
        let verifier = Arc::new(IdentityTokenVerifier::new(
            keys,
            config.identity_issuer.clone(),
        ));
        Ok(Self::new(config, store, verifier))
    }

    /// Verify an access token minted by this service.
    pub fn verify_access_token(&self, token: &str) -> Option<AccessTokenClaims> {
        self.issuer.verify_access_token(token)
    }

    /// Register a new email/password account.
    pub async fn register(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::ValidationError("Email is required".into()));
        }
        validate_password(password, self.config.min_password_len)?;

        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(AuthError::Conflict("Email already registered".into()));
        }

        let password_hash = hash_password(password, self.config.bcrypt_cost)?;
        let user = self
            .store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash: Some(password_hash),
                federated_subject_id: None,
                auth_provider: AuthProvider::Password,
                display_name: None,
            })
            .await?;
        info!(user_id = %user.id, "registered password user");

        self.issuer.issue_pair(self.store.as_ref(), &user).await
    }

    /// Authenticate with email + password.
    ///
    /// Unknown email, federated-only account and wrong password all yield
    /// the same `CredentialError`.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::ValidationError(
                "Email and password are required".into(),
            ));
        }
        let Some(user) = self.store.find_user_by_email(email).await? else {
            return Err(AuthError::CredentialError);
        };
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(AuthError::CredentialError);
        };
        if !verify_password(password, hash) {
            debug!(user_id = %user.id, "password mismatch");
            return Err(AuthError::CredentialError);
        }

        self.issuer.issue_pair(self.store.as_ref(), &user).await
    }

    /// Sign in with a federated identity token.
    ///
    /// The account email comes from the token, else `fallback_email`, else a
    /// placeholder derived from the subject. An existing account is matched
    /// by federated subject first, then by email, and linked if it has no
    /// subject yet.
    pub async fn federated_sign_in(
        &self,
        identity_token: &str,
        expected_audience: &str,
        fallback_email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<AuthResponse, AuthError> {
        if identity_token.trim().is_empty() {
            return Err(AuthError::ValidationError("Identity token is required".into()));
        }

        let claims = self
            .verifier
            .verify(identity_token, expected_audience)
            .await
            .inspect_err(|e| warn!(error = %e, "identity token verification failed"))?;

        let subject = claims.sub;
        let email = match non_blank(claims.email.as_deref()).or(non_blank(fallback_email)) {
            Some(email) => email.to_string(),
            None => format!("{subject}@{}", self.config.placeholder_email_domain),
        };

        let existing = match self.store.find_user_by_federated_id(&subject).await? {
            Some(user) => Some(user),
            None => self.store.find_user_by_email(&email).await?,
        };

        let user = match existing {
            Some(user) if user.federated_subject_id.is_none() => {
                let linked = self
                    .store
                    .update_user(
                        user.id,
                        UserUpdate {
                            federated_subject_id: Some(subject.clone()),
                            auth_provider: Some(AuthProvider::Federated),
                        },
                    )
                    .await?;
                info!(user_id = %linked.id, "linked federated identity to existing account");
                linked
            }
            Some(user) => {
                if user.federated_subject_id.as_deref() != Some(subject.as_str()) {
                    warn!(
                        user_id = %user.id,
                        "federated sign-in matched an account linked to a different subject"
                    );
                }
                user
            }
            None => self.create_federated_user(&subject, email, display_name).await?,
        };

        self.issuer.issue_pair(self.store.as_ref(), &user).await
    }

    async fn create_federated_user(
        &self,
        subject: &str,
        email: String,
        display_name: Option<&str>,
    ) -> Result<User, AuthError> {
        let display_name = non_blank(display_name)
            .map(str::to_string)
            .or_else(|| email.split('@').next().map(str::to_string));
        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash: None,
                federated_subject_id: Some(subject.to_string()),
                auth_provider: AuthProvider::Federated,
                display_name,
            })
            .await?;
        info!(user_id = %user.id, "created federated user");
        Ok(user)
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// revoked before the new pair is minted and can never be used again.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::ValidationError("Refresh token is required".into()));
        }
        let token_hash = hash_refresh_token(refresh_token);

        let Some(record) = self.store.find_refresh_record_by_hash(&token_hash).await? else {
            return Err(AuthError::NotFound);
        };

        let now = Utc::now();
        if record.revoked {
            // Expired tokens were revoked by cleanup, not by rotation.
            if !record.is_expired_at(now) {
                self.handle_reuse(record.user_id).await?;
            }
            return Err(AuthError::NotFound);
        }

        if record.is_expired_at(now) {
            self.store.revoke_refresh_record(record.id).await?;
            debug!(record_id = %record.id, "expired refresh token revoked");
            return Err(AuthError::Expired);
        }

        // Only the caller that flips the flag may mint a new pair. A caller
        // that loses the flip saw the record live, so the winner's new pair is
        // left alone.
        if !self.store.revoke_refresh_record(record.id).await? {
            warn!(user_id = %record.user_id, "lost concurrent refresh of the same token");
            return Err(AuthError::NotFound);
        }

        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        self.issuer.issue_pair(self.store.as_ref(), &user).await
    }

    /// An already revoked, unexpired refresh token was presented again.
    /// Optionally revoke every session of the owner.
    async fn handle_reuse(&self, user_id: Uuid) -> Result<(), AuthError> {
        if self.config.revoke_all_on_reuse {
            let revoked = self.store.revoke_refresh_records_for_user(user_id).await?;
            warn!(user_id = %user_id, revoked, "refresh token reuse detected, sessions revoked");
        } else {
            warn!(user_id = %user_id, "refresh token reuse detected");
        }
        Ok(())
    }

    /// Revoke a refresh token. Unknown or already revoked tokens are not an
    /// error.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::ValidationError("Refresh token is required".into()));
        }
        let token_hash = hash_refresh_token(refresh_token);
        if let Some(record) = self.store.find_refresh_record_by_hash(&token_hash).await? {
            self.store.revoke_refresh_record(record.id).await?;
            debug!(user_id = %record.user_id, "refresh token revoked on logout");
        }
        Ok(())
    }

    /// Delete an account and everything it owns.
    ///
    /// Password users must confirm their password; federated users have none
    /// and skip the check.
    pub async fn delete_account(&self, user_id: Uuid, password: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if user.auth_provider == AuthProvider::Password {
            if password.is_empty() {
                return Err(AuthError::ValidationError("Password is required".into()));
            }
            let matches = user
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash));
            if !matches {
                return Err(AuthError::CredentialError);
            }
        }

        self.store.purge_account(user.id).await?;
        info!(user_id = %user.id, "account deleted");
        Ok(())
    }
}
