//! Credential persistence contract.
//!
//! The auth core talks to storage only through [`CredentialStore`]. Lookups
//! return `Ok(None)` when nothing matches; mutations on missing rows return
//! [`StoreError::NotFound`]. Tombstoned users are invisible to every lookup.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{NewUser, RefreshTokenRecord, User, UserUpdate};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Users, refresh-token records, and the user-owned records scrubbed on
/// account deletion.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_federated_id(&self, subject: &str)
    -> Result<Option<User>, StoreError>;

    /// Create a user. Fails with `Conflict` if the email (or federated
    /// subject) is already bound to a live user.
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Apply `update` and return the stored user. A federated subject that is
    /// already set is never overwritten.
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, StoreError>;

    async fn tombstone_user(&self, user_id: Uuid) -> Result<(), StoreError>;

    async fn create_refresh_record(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_record_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Mark a record revoked only if it is not revoked yet. Returns `true`
    /// when this call performed the flip.
    async fn revoke_refresh_record(&self, record_id: Uuid) -> Result<bool, StoreError>;

    /// Revoke every live refresh record of a user. Returns the number flipped.
    async fn revoke_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn delete_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Delete subscriptions, reports filed by the user, and blocks in either
    /// direction.
    async fn delete_dependent_records(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Delete refresh records and dependent records, then tombstone the user,
    /// as one all-or-nothing unit.
    async fn purge_account(&self, user_id: Uuid) -> Result<(), StoreError>;
}
