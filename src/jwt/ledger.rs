//! Single-use bookkeeping for password-reset tokens.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::{Claims, TokenKind};
use crate::errors::{AppError, AppResult};

/// Records the token's `jti` as consumed; a second consumption is rejected.
///
/// Meant to run inside the same transaction as the password update so a
/// failed update leaves the token usable.
pub async fn consume_reset_token(conn: &mut SqliteConnection, claims: &Claims, now: DateTime<Utc>) -> AppResult<()> {
    if claims.kind != TokenKind::Reset {
        return Err(AppError::token("only reset tokens can be consumed"));
    }

    sqlx::query("DELETE FROM consumed_reset_tokens WHERE expires_at < ?")
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let inserted = sqlx::query(
        "INSERT INTO consumed_reset_tokens (jti, user_id, expires_at, consumed_at) VALUES (?, ?, ?, ?) ON CONFLICT(jti) DO NOTHING",
    )
    .bind(claims.jti.to_string())
    .bind(claims.sub.to_string())
    .bind(claims.expires_at()?)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        tracing::warn!(user_id = %claims.sub, jti = %claims.jti, "reset token replayed");
        return Err(AppError::token("reset token has already been used"));
    }

    Ok(())
}
