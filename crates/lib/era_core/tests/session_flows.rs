//! End-to-end credential flows over the in-memory store.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use era_core::auth::AuthError;
use era_core::auth::tokens::hash_refresh_token;
use era_core::models::auth::{AuthProvider, NewUser, RefreshTokenRecord, User, UserUpdate};
use era_core::store::{CredentialStore, StoreError};
use era_core::store::memory::MemoryCredentialStore;
use uuid::Uuid;

use common::{BUNDLE_ID, identity_claims, service, service_with, sign, test_config};

const EMAIL: &str = "pat@example.com";
const PASSWORD: &str = "correct horse";

fn store() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::new())
}

// --- register / login ---

#[tokio::test]
async fn register_then_login_yields_same_subject() {
    let svc = service(store());

    let registered = svc.register(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(registered.user.email, EMAIL);
    assert!(!registered.user.is_federated_user);

    let logged_in = svc.login(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(logged_in.user.id, registered.user.id);
    assert_ne!(logged_in.refresh_token, registered.refresh_token);

    let claims = svc.verify_access_token(&logged_in.access_token).unwrap();
    assert_eq!(claims.sub, registered.user.id.to_string());
    assert_eq!(claims.email, EMAIL);
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() {
    let svc = service(store());
    svc.register(EMAIL, PASSWORD).await.unwrap();

    let err = svc.register(EMAIL, "another password").await.unwrap_err();
    assert!(matches!(err, AuthError::Conflict(_)));
}

#[tokio::test]
async fn registration_rejects_short_password_and_blank_email() {
    let svc = service(store());
    assert!(matches!(
        svc.register(EMAIL, "short").await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
    assert!(matches!(
        svc.register("  ", PASSWORD).await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let store = store();
    let svc = service(store.clone());
    svc.register(EMAIL, PASSWORD).await.unwrap();
    svc.federated_sign_in(
        &sign(&identity_claims("fed-only", Some("fed@example.com"))),
        BUNDLE_ID,
        None,
        None,
    )
    .await
    .unwrap();

    let unknown = svc.login("nobody@example.com", PASSWORD).await.unwrap_err();
    let wrong = svc.login(EMAIL, "wrong password").await.unwrap_err();
    let federated = svc.login("fed@example.com", PASSWORD).await.unwrap_err();

    for err in [&unknown, &wrong, &federated] {
        assert!(matches!(err, AuthError::CredentialError));
    }
    assert_eq!(unknown.to_string(), wrong.to_string());
    assert_eq!(wrong.to_string(), federated.to_string());
}

#[tokio::test]
async fn login_requires_both_fields() {
    let svc = service(store());
    assert!(matches!(
        svc.login("", PASSWORD).await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
    assert!(matches!(
        svc.login(EMAIL, "").await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

// --- refresh rotation ---

#[tokio::test]
async fn refresh_rotates_and_old_token_is_dead() {
    let svc = service(store());
    let first = svc.register(EMAIL, PASSWORD).await.unwrap();

    let second = svc.refresh(&first.refresh_token).await.unwrap();
    assert_eq!(second.user.id, first.user.id);
    assert_ne!(second.refresh_token, first.refresh_token);

    let replay = svc.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(replay, AuthError::NotFound));
}

#[tokio::test]
async fn rotation_chain_never_repeats_a_token() {
    let svc = service(store());
    let mut current = svc.register(EMAIL, PASSWORD).await.unwrap().refresh_token;
    let mut seen = vec![current.clone()];

    for _ in 0..5 {
        current = svc.refresh(&current).await.unwrap().refresh_token;
        assert!(!seen.contains(&current));
        seen.push(current.clone());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_of_one_token_succeeds_at_most_once() {
    // Late losers would otherwise read the record as revoked and trip reuse
    // handling, which also revokes the winner's pair.
    let mut config = test_config();
    config.revoke_all_on_reuse = false;
    let svc = Arc::new(service_with(config, store()));
    let token = svc.register(EMAIL, PASSWORD).await.unwrap().refresh_token;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let svc = Arc::clone(&svc);
        let token = token.clone();
        handles.push(tokio::spawn(async move { svc.refresh(&token).await.ok() }));
    }
    let mut winners = Vec::new();
    for handle in handles {
        if let Some(response) = handle.await.unwrap() {
            winners.push(response);
        }
    }
    assert_eq!(winners.len(), 1);

    let next = svc.refresh(&winners[0].refresh_token).await.unwrap();
    assert_eq!(next.user.id, winners[0].user.id);
}

/// Hands out refresh records as they looked before any revocation, the view
/// a request has when it loses the conditional revoke to a concurrent one.
struct StaleRefreshReads {
    inner: Arc<MemoryCredentialStore>,
}

#[async_trait]
impl CredentialStore for StaleRefreshReads {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_id(user_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn find_user_by_federated_id(
        &self,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_federated_id(subject).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.inner.create_user(new_user).await
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, StoreError> {
        self.inner.update_user(user_id, update).await
    }

    async fn tombstone_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.inner.tombstone_user(user_id).await
    }

    async fn create_refresh_record(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        self.inner
            .create_refresh_record(user_id, token_hash, expires_at)
            .await
    }

    async fn find_refresh_record_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let record = self.inner.find_refresh_record_by_hash(token_hash).await?;
        Ok(record.map(|r| RefreshTokenRecord { revoked: false, ..r }))
    }

    async fn revoke_refresh_record(&self, record_id: Uuid) -> Result<bool, StoreError> {
        self.inner.revoke_refresh_record(record_id).await
    }

    async fn revoke_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.revoke_refresh_records_for_user(user_id).await
    }

    async fn delete_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_refresh_records_for_user(user_id).await
    }

    async fn delete_dependent_records(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_dependent_records(user_id).await
    }

    async fn purge_account(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.inner.purge_account(user_id).await
    }
}

#[tokio::test]
async fn losing_the_revoke_leaves_the_winners_pair_alive() {
    let memory = store();
    let svc = service(memory.clone());
    let first = svc.register(EMAIL, PASSWORD).await.unwrap();
    let winner = svc.refresh(&first.refresh_token).await.unwrap();

    // Same token again, read as still live: the conditional revoke fails.
    let stale = service_with(
        test_config(),
        Arc::new(StaleRefreshReads {
            inner: memory.clone(),
        }),
    );
    let err = stale.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::NotFound));

    let live = memory
        .refresh_records_for_user(first.user.id)
        .unwrap()
        .into_iter()
        .filter(|r| !r.revoked)
        .count();
    assert_eq!(live, 1);
    svc.refresh(&winner.refresh_token).await.unwrap();
}

#[tokio::test]
async fn refresh_lifetime_past_the_calendar_is_an_internal_error() {
    let mut config = test_config();
    config.refresh_token_ttl = Duration::days(100_000_000);
    let store = store();
    let svc = service_with(config, store.clone());

    let err = svc.register(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)));
    let user = store.find_user_by_email(EMAIL).await.unwrap().unwrap();
    assert!(store.refresh_records_for_user(user.id).unwrap().is_empty());
}

#[tokio::test]
async fn reuse_of_rotated_token_revokes_every_session() {
    let store = store();
    let svc = service(store.clone());
    let first = svc.register(EMAIL, PASSWORD).await.unwrap();
    let other_device = svc.login(EMAIL, PASSWORD).await.unwrap();
    let rotated = svc.refresh(&first.refresh_token).await.unwrap();

    // Replay of the rotated-away token.
    assert!(svc.refresh(&first.refresh_token).await.is_err());

    let records = store.refresh_records_for_user(first.user.id).unwrap();
    assert!(records.iter().all(|r| r.revoked));
    assert!(matches!(
        svc.refresh(&rotated.refresh_token).await.unwrap_err(),
        AuthError::NotFound
    ));
    assert!(svc.refresh(&other_device.refresh_token).await.is_err());
}

#[tokio::test]
async fn reuse_leaves_other_sessions_alone_when_disabled() {
    let mut config = test_config();
    config.revoke_all_on_reuse = false;
    let svc = service_with(config, store());

    let first = svc.register(EMAIL, PASSWORD).await.unwrap();
    let rotated = svc.refresh(&first.refresh_token).await.unwrap();
    assert!(svc.refresh(&first.refresh_token).await.is_err());

    svc.refresh(&rotated.refresh_token).await.unwrap();
}

#[tokio::test]
async fn expired_refresh_token_is_rejected_and_revoked() {
    let store = store();
    let mut config = test_config();
    config.refresh_token_ttl = Duration::zero();
    let svc = service_with(config, store.clone());

    let issued = svc.register(EMAIL, PASSWORD).await.unwrap();
    let err = svc.refresh(&issued.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired));

    let record = store
        .find_refresh_record_by_hash(&hash_refresh_token(&issued.refresh_token))
        .await
        .unwrap()
        .unwrap();
    assert!(record.revoked);

    // A second attempt is a plain miss and must not count as reuse.
    let again = svc.refresh(&issued.refresh_token).await.unwrap_err();
    assert!(matches!(again, AuthError::NotFound));
}

#[tokio::test]
async fn unknown_or_empty_refresh_token() {
    let svc = service(store());
    assert!(matches!(
        svc.refresh("never-issued").await.unwrap_err(),
        AuthError::NotFound
    ));
    assert!(matches!(
        svc.refresh("").await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

// --- logout ---

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let svc = service(store());
    let issued = svc.register(EMAIL, PASSWORD).await.unwrap();

    svc.logout(&issued.refresh_token).await.unwrap();
    svc.logout(&issued.refresh_token).await.unwrap();
    svc.logout("never-issued").await.unwrap();

    assert!(svc.refresh(&issued.refresh_token).await.is_err());
    assert!(matches!(
        svc.logout("").await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

// --- federated sign-in ---

#[tokio::test]
async fn federated_sign_in_creates_then_reuses_account() {
    let store = store();
    let svc = service(store.clone());
    let token = sign(&identity_claims("apple-sub-1", Some("apple@example.com")));

    let first = svc
        .federated_sign_in(&token, BUNDLE_ID, None, Some("Pat"))
        .await
        .unwrap();
    assert!(first.user.is_federated_user);
    assert_eq!(first.user.email, "apple@example.com");

    // Later sign-ins typically carry no email claim.
    let later = sign(&identity_claims("apple-sub-1", None));
    let second = svc
        .federated_sign_in(&later, BUNDLE_ID, None, None)
        .await
        .unwrap();
    assert_eq!(second.user.id, first.user.id);
    assert_eq!(store.live_user_count().unwrap(), 1);

    let user = store.find_user_by_id(first.user.id).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Pat"));
    assert!(user.password_hash.is_none());
}

#[tokio::test]
async fn federated_sign_in_links_existing_password_account() {
    let store = store();
    let svc = service(store.clone());
    let registered = svc.register(EMAIL, PASSWORD).await.unwrap();

    let token = sign(&identity_claims("apple-sub-2", Some(EMAIL)));
    let signed_in = svc
        .federated_sign_in(&token, BUNDLE_ID, None, None)
        .await
        .unwrap();
    assert_eq!(signed_in.user.id, registered.user.id);

    let user = store.find_user_by_id(registered.user.id).await.unwrap().unwrap();
    assert_eq!(user.federated_subject_id.as_deref(), Some("apple-sub-2"));
    assert_eq!(user.auth_provider, AuthProvider::Federated);
    // The password still works after linking.
    svc.login(EMAIL, PASSWORD).await.unwrap();
}

#[tokio::test]
async fn federated_sign_in_uses_fallback_email() {
    let svc = service(store());
    let token = sign(&identity_claims("apple-sub-3", None));

    let response = svc
        .federated_sign_in(&token, BUNDLE_ID, Some("client@example.com"), None)
        .await
        .unwrap();
    assert_eq!(response.user.email, "client@example.com");
}

#[tokio::test]
async fn federated_sign_in_without_any_email_uses_placeholder() {
    let store = store();
    let svc = service(store.clone());
    let token = sign(&identity_claims("apple-sub-4", None));

    let response = svc
        .federated_sign_in(&token, BUNDLE_ID, Some("  "), None)
        .await
        .unwrap();
    assert_eq!(response.user.email, "apple-sub-4@privaterelay.appleid.com");

    let user = store.find_user_by_id(response.user.id).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("apple-sub-4"));
}

#[tokio::test]
async fn federated_subject_is_never_overwritten() {
    let store = store();
    let svc = service(store.clone());
    let shared = "shared@example.com";

    let original = svc
        .federated_sign_in(
            &sign(&identity_claims("apple-sub-a", Some(shared))),
            BUNDLE_ID,
            None,
            None,
        )
        .await
        .unwrap();
    svc.federated_sign_in(
        &sign(&identity_claims("apple-sub-b", Some(shared))),
        BUNDLE_ID,
        None,
        None,
    )
    .await
    .unwrap();

    let user = store.find_user_by_id(original.user.id).await.unwrap().unwrap();
    assert_eq!(user.federated_subject_id.as_deref(), Some("apple-sub-a"));
}

#[tokio::test]
async fn federated_sign_in_rejects_foreign_audience() {
    let store = store();
    let svc = service(store.clone());
    let token = sign(&identity_claims("apple-sub-5", Some("x@example.com")));

    let err = svc
        .federated_sign_in(&token, "com.other.app", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::CredentialError));
    assert_eq!(store.live_user_count().unwrap(), 0);
}

#[tokio::test]
async fn federated_sign_in_rejects_expired_and_malformed_tokens() {
    let svc = service(store());
    let mut claims = identity_claims("apple-sub-6", None);
    claims["exp"] = serde_json::json!(chrono::Utc::now().timestamp() - 1);

    assert!(matches!(
        svc.federated_sign_in(&sign(&claims), BUNDLE_ID, None, None)
            .await
            .unwrap_err(),
        AuthError::Expired
    ));
    assert!(matches!(
        svc.federated_sign_in("not-a-jwt", BUNDLE_ID, None, None)
            .await
            .unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

// --- account deletion ---

#[tokio::test]
async fn wrong_password_leaves_account_intact() {
    let store = store();
    let svc = service(store.clone());
    let issued = svc.register(EMAIL, PASSWORD).await.unwrap();
    store.add_subscription(issued.user.id).unwrap();

    let err = svc
        .delete_account(issued.user.id, "wrong password")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::CredentialError));
    assert_eq!(store.dependent_record_count(issued.user.id).unwrap(), 1);
    svc.refresh(&issued.refresh_token).await.unwrap();
}

#[tokio::test]
async fn password_account_requires_password_to_delete() {
    let svc = service(store());
    let issued = svc.register(EMAIL, PASSWORD).await.unwrap();
    assert!(matches!(
        svc.delete_account(issued.user.id, "").await.unwrap_err(),
        AuthError::ValidationError(_)
    ));
}

#[tokio::test]
async fn delete_account_purges_everything_and_frees_email() {
    let store = store();
    let svc = service(store.clone());
    let issued = svc.register(EMAIL, PASSWORD).await.unwrap();
    let other = Uuid::now_v7();
    store.add_subscription(issued.user.id).unwrap();
    store.add_report(issued.user.id).unwrap();
    store.add_block(other, issued.user.id).unwrap();

    svc.delete_account(issued.user.id, PASSWORD).await.unwrap();

    assert_eq!(store.dependent_record_count(issued.user.id).unwrap(), 0);
    assert!(store.refresh_records_for_user(issued.user.id).unwrap().is_empty());
    assert!(svc.refresh(&issued.refresh_token).await.is_err());
    assert!(matches!(
        svc.login(EMAIL, PASSWORD).await.unwrap_err(),
        AuthError::CredentialError
    ));

    let again = svc.register(EMAIL, PASSWORD).await.unwrap();
    assert_ne!(again.user.id, issued.user.id);
}

#[tokio::test]
async fn federated_account_deletes_without_password() {
    let store = store();
    let svc = service(store.clone());
    let issued = svc
        .federated_sign_in(
            &sign(&identity_claims("apple-sub-7", Some("gone@example.com"))),
            BUNDLE_ID,
            None,
            None,
        )
        .await
        .unwrap();

    svc.delete_account(issued.user.id, "").await.unwrap();
    assert_eq!(store.live_user_count().unwrap(), 0);
    assert!(matches!(
        svc.delete_account(issued.user.id, "").await.unwrap_err(),
        AuthError::NotFound
    ));
}
