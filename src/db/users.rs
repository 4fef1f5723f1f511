use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::user::DbUser;

const USER_COLUMNS: &str = "id, first_name, last_name, email, phone, password_hash, role, squad_id, \
     verify_code, is_verified, attempts, last_login, created_at, updated_at";

/// Column values for a freshly registered identity.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub role: String,
    pub squad_id: Option<Uuid>,
    pub verify_code: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<String>,
    pub squad_id: Option<Uuid>,
}

pub async fn fetch_by_id<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?)
}

pub async fn fetch_by_email<'e, E: SqliteExecutor<'e>>(executor: E, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(email)
        .fetch_optional(executor)
        .await?)
}

pub async fn list<'e, E: SqliteExecutor<'e>>(executor: E, filter: &UserFilter) -> AppResult<Vec<DbUser>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE 1 = 1"));
    if let Some(role) = &filter.role {
        query.push(" AND role = ").push_bind(role.clone());
    }
    if let Some(squad_id) = filter.squad_id {
        query.push(" AND squad_id = ").push_bind(squad_id.to_string());
    }
    query.push(" ORDER BY created_at");

    Ok(query.build_query_as::<DbUser>().fetch_all(executor).await?)
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(executor: E, user: &NewUser, now: DateTime<Utc>) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO users (id, first_name, last_name, email, phone, password_hash, role, squad_id, verify_code, is_verified, attempts, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(user.id.to_string())
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.phone)
    .bind(&user.password_hash)
    .bind(&user.role)
    .bind(user.squad_id.map(|id| id.to_string()))
    .bind(&user.verify_code)
    .bind(user.is_verified)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict("email already in use"),
        _ => AppError::Database(err),
    })?;

    Ok(())
}

/// Bumps the counter of an unverified user in one statement and returns the
/// new value; `None` when the user is gone or already verified.
pub async fn increment_attempts<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid, now: DateTime<Utc>) -> AppResult<Option<u32>> {
    let attempts: Option<i64> = sqlx::query_scalar(
        "UPDATE users SET attempts = attempts + 1, updated_at = ? WHERE id = ? AND is_verified = 0 RETURNING attempts",
    )
    .bind(now)
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    attempts
        .map(|attempts| u32::try_from(attempts).map_err(|_| AppError::internal(format!("user {id} has an invalid attempt count"))))
        .transpose()
}

/// Marks the user verified unless it already is or has used up its attempts.
pub async fn mark_verified<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: Uuid,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let updated = sqlx::query(
        "UPDATE users SET is_verified = 1, attempts = 0, updated_at = ? WHERE id = ? AND is_verified = 0 AND attempts < ?",
    )
    .bind(now)
    .bind(id.to_string())
    .bind(i64::from(max_attempts))
    .execute(executor)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub async fn update_password<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: Uuid,
    password_hash: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let updated = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(password_hash)
        .bind(now)
        .bind(id.to_string())
        .execute(executor)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }
    Ok(())
}

pub async fn update_role<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid, role: &str, now: DateTime<Utc>) -> AppResult<()> {
    let updated = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role)
        .bind(now)
        .bind(id.to_string())
        .execute(executor)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }
    Ok(())
}

pub async fn touch_last_login<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(now)
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid) -> AppResult<bool> {
    let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(deleted.rows_affected() > 0)
}

pub async fn delete_memberships_of<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM group_memberships WHERE principal = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Adds the user to `role`; an existing membership is left as is.
pub async fn insert_membership<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid, role: &str, now: DateTime<Utc>) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO group_memberships (principal, role, created_at) VALUES (?, ?, ?) ON CONFLICT(principal, role) DO NOTHING",
    )
    .bind(id.to_string())
    .bind(role)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_membership<'e, E: SqliteExecutor<'e>>(executor: E, id: Uuid, role: &str) -> AppResult<bool> {
    let deleted = sqlx::query("DELETE FROM group_memberships WHERE principal = ? AND role = ?")
        .bind(id.to_string())
        .bind(role)
        .execute(executor)
        .await?;
    Ok(deleted.rows_affected() > 0)
}
