//! In-memory credential store.
//!
//! Every operation runs under a single mutex, which makes conditional
//! revocation and [`CredentialStore::purge_account`] atomic. Used by tests and
//! by local runs without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::models::auth::{NewUser, RefreshTokenRecord, User, UserUpdate};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredUser {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, StoredUser>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    /// Subscription owner ids, one entry per subscription.
    subscriptions: Vec<Uuid>,
    /// Reporter ids, one entry per filed report.
    reports: Vec<Uuid>,
    /// `(blocker, blocked)` pairs.
    blocks: Vec<(Uuid, Uuid)>,
}

impl State {
    fn live_user(&self, user_id: Uuid) -> Option<&User> {
        self.users
            .get(&user_id)
            .filter(|s| s.is_live())
            .map(|s| &s.user)
    }

    fn delete_refresh_records(&mut self, user_id: Uuid) -> u64 {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|_, r| r.user_id != user_id);
        (before - self.refresh_tokens.len()) as u64
    }

    fn delete_dependents(&mut self, user_id: Uuid) {
        self.subscriptions.retain(|owner| *owner != user_id);
        self.reports.retain(|reporter| *reporter != user_id);
        self.blocks
            .retain(|(blocker, blocked)| *blocker != user_id && *blocked != user_id);
    }

    fn tombstone(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        match self.users.get_mut(&user_id) {
            Some(stored) if stored.is_live() => {
                stored.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}

/// Mutex-guarded in-memory [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<State>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Internal("credential store lock poisoned".into()))
    }

    /// Record a subscription owned by `user_id`.
    pub fn add_subscription(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.subscriptions.push(user_id);
        Ok(())
    }

    /// Record a report filed by `reporter_id`.
    pub fn add_report(&self, reporter_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.reports.push(reporter_id);
        Ok(())
    }

    pub fn add_block(&self, blocker_id: Uuid, blocked_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.blocks.push((blocker_id, blocked_id));
        Ok(())
    }

    /// Count of subscriptions, reports and blocks that reference `user_id`.
    pub fn dependent_record_count(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let state = self.lock()?;
        let subs = state.subscriptions.iter().filter(|o| **o == user_id).count();
        let reports = state.reports.iter().filter(|r| **r == user_id).count();
        let blocks = state
            .blocks
            .iter()
            .filter(|(a, b)| *a == user_id || *b == user_id)
            .count();
        Ok(subs + reports + blocks)
    }

    /// All refresh records of `user_id`, revoked or not.
    pub fn refresh_records_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        Ok(self
            .lock()?
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    /// Number of live (non-tombstoned) users.
    pub fn live_user_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.users.values().filter(|s| s.is_live()).count())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.live_user(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|s| s.is_live() && s.user.email == email)
            .map(|s| s.user.clone()))
    }

    async fn find_user_by_federated_id(
        &self,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|s| s.is_live() && s.user.federated_subject_id.as_deref() == Some(subject))
            .map(|s| s.user.clone()))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        for stored in state.users.values().filter(|s| s.is_live()) {
            if stored.user.email == new_user.email {
                return Err(StoreError::Conflict("Email already registered".into()));
            }
            if new_user.federated_subject_id.is_some()
                && stored.user.federated_subject_id == new_user.federated_subject_id
            {
                return Err(StoreError::Conflict("Federated identity already linked".into()));
            }
        }

        let user = User {
            id: Uuid::now_v7(),
            email: new_user.email,
            password_hash: new_user.password_hash,
            federated_subject_id: new_user.federated_subject_id,
            auth_provider: new_user.auth_provider,
            display_name: new_user.display_name,
            created_at: Utc::now(),
        };
        state.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                deleted_at: None,
            },
        );
        Ok(user)
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        let stored = state
            .users
            .get_mut(&user_id)
            .filter(|s| s.is_live())
            .ok_or(StoreError::NotFound)?;

        if stored.user.federated_subject_id.is_none() {
            stored.user.federated_subject_id = update.federated_subject_id;
        }
        if let Some(provider) = update.auth_provider {
            stored.user.auth_provider = provider;
        }
        Ok(stored.user.clone())
    }

    async fn tombstone_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.tombstone(user_id)
    }

    async fn create_refresh_record(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let mut state = self.lock()?;
        if state.live_user(user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        let record = RefreshTokenRecord {
            id: Uuid::now_v7(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            revoked: false,
        };
        state.refresh_tokens.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_refresh_record_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .lock()?
            .refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_record(&self, record_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let record = state
            .refresh_tokens
            .get_mut(&record_id)
            .ok_or(StoreError::NotFound)?;
        if record.revoked {
            return Ok(false);
        }
        record.revoked = true;
        Ok(true)
    }

    async fn revoke_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut flipped = 0;
        for record in state
            .refresh_tokens
            .values_mut()
            .filter(|r| r.user_id == user_id && !r.revoked)
        {
            record.revoked = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn delete_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.lock()?.delete_refresh_records(user_id))
    }

    async fn delete_dependent_records(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.lock()?.delete_dependents(user_id);
        Ok(())
    }

    async fn purge_account(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        // Check first so a missing user leaves everything untouched.
        if state.live_user(user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        state.delete_refresh_records(user_id);
        state.delete_dependents(user_id);
        state.tombstone(user_id)
    }
}
