//! PostgreSQL credential store.
//!
//! Soft-deleted users carry a `deleted_at` timestamp and are filtered out of
//! every lookup. Account purges run in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{CredentialStore, StoreError};
use crate::models::auth::{AuthProvider, NewUser, RefreshTokenRecord, User, UserUpdate};

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

type UserRow = (
    Uuid,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    DateTime<Utc>,
);

type RefreshRow = (Uuid, Uuid, String, DateTime<Utc>, bool);

const USER_COLUMNS: &str = "id, email, password_hash, federated_subject_id, auth_provider, \
                            display_name, created_at";

fn user_from_row(row: UserRow) -> Result<User, StoreError> {
    let (id, email, password_hash, federated_subject_id, provider, display_name, created_at) =
        row;
    Ok(User {
        id,
        email,
        password_hash,
        federated_subject_id,
        auth_provider: provider.parse::<AuthProvider>().map_err(StoreError::Internal)?,
        display_name,
        created_at,
    })
}

fn refresh_from_row((id, user_id, token_hash, expires_at, revoked): RefreshRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id,
        user_id,
        token_hash,
        expires_at,
        revoked,
    }
}

/// Map unique-index violations to `Conflict`, everything else to `Db`.
fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return StoreError::Conflict(format!("{what} already registered"));
    }
    StoreError::Db(e)
}

/// [`CredentialStore`] backed by a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {predicate} = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn delete_refresh_records_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete_dependents_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM reports WHERE reporter_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM blocks WHERE blocker_id = $1 OR blocked_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn tombstone_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE users SET deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_federated_id(
        &self,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_user_where("federated_subject_id", subject).await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users \
             (id, email, password_hash, federated_subject_id, auth_provider, display_name) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::now_v7())
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.federated_subject_id)
            .bind(new_user.auth_provider.as_str())
            .bind(&new_user.display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "Account"))?;
        user_from_row(row)
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET \
               federated_subject_id = COALESCE(federated_subject_id, $2), \
               auth_provider = COALESCE($3, auth_provider), \
               updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(&update.federated_subject_id)
            .bind(update.auth_provider.map(|p| p.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "Federated identity"))?;
        row.map(user_from_row).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn tombstone_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::tombstone_tx(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_refresh_record(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, token_hash, expires_at, revoked",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Refresh token"))?;
        Ok(refresh_from_row(row))
    }

    async fn find_refresh_record_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            "SELECT id, user_id, token_hash, expires_at, revoked \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(refresh_from_row))
    }

    async fn revoke_refresh_record(&self, record_id: Uuid) -> Result<bool, StoreError> {
        let done = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true WHERE id = $1 AND revoked = false",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 1 {
            return Ok(true);
        }
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM refresh_tokens WHERE id = $1)",
        )
        .bind(record_id)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            Ok(false)
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn revoke_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let done = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true WHERE user_id = $1 AND revoked = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }

    async fn delete_refresh_records_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = Self::delete_refresh_records_tx(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_dependent_records(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::delete_dependents_tx(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn purge_account(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let tokens = Self::delete_refresh_records_tx(&mut tx, user_id).await?;
        Self::delete_dependents_tx(&mut tx, user_id).await?;
        // Dropping `tx` on error rolls everything back.
        Self::tombstone_tx(&mut tx, user_id).await?;
        tx.commit().await?;
        info!(user_id = %user_id, refresh_tokens = tokens, "account purged");
        Ok(())
    }
}
