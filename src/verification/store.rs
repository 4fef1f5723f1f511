use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Identity, VerificationRecord};
use crate::db::users;
use crate::errors::{AppError, AppResult};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>>;
    /// Atomically counts one more wrong code and returns the new total;
    /// `None` when the identity is gone or already verified.
    async fn record_failed_attempt(&self, id: Uuid) -> AppResult<Option<u32>>;
    /// Marks the identity verified and clears its counter; false when it is
    /// already verified or out of attempts.
    async fn mark_verified(&self, id: Uuid, max_attempts: u32) -> AppResult<bool>;
    /// Removes the identity together with its group memberships.
    async fn delete(&self, id: Uuid) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>> {
        let Some(row) = users::fetch_by_email(&self.pool, email).await? else {
            return Ok(None);
        };

        let attempts = u32::try_from(row.attempts)
            .map_err(|_| AppError::internal(format!("user {} has an invalid attempt count", row.id)))?;

        Ok(Some(Identity {
            id: row.uuid()?,
            email: row.email,
            verification: VerificationRecord {
                code: row.verify_code,
                is_verified: row.is_verified,
                attempts,
            },
        }))
    }

    async fn record_failed_attempt(&self, id: Uuid) -> AppResult<Option<u32>> {
        users::increment_attempts(&self.pool, id, chrono::Utc::now()).await
    }

    async fn mark_verified(&self, id: Uuid, max_attempts: u32) -> AppResult<bool> {
        users::mark_verified(&self.pool, id, max_attempts, chrono::Utc::now()).await
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        users::delete_memberships_of(&mut *tx, id).await?;
        if !users::delete(&mut *tx, id).await? {
            return Err(AppError::not_found("identity not found"));
        }
        tx.commit().await?;
        Ok(())
    }
}
