//! Durable storage of roles, grants and group memberships.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::rbac::{DbGrant, DbRole, Grant, GrantFilter, Membership, Role, StoredGrant, StoredMembership};

/// Create/find/update/delete surface the policy engine is written against.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn find_grant(&self, grant: &Grant) -> AppResult<Option<StoredGrant>>;
    async fn find_grant_by_id(&self, id: i64) -> AppResult<Option<StoredGrant>>;
    async fn find_grants(&self, filter: &GrantFilter) -> AppResult<Vec<StoredGrant>>;
    /// Inserts unless the triple already exists; returns the stored row either way.
    async fn create_grant(&self, grant: &Grant) -> AppResult<StoredGrant>;
    /// Atomically swaps `old` for `new`; NotFound if `old` is absent.
    async fn replace_grant(&self, old: &Grant, new: &Grant) -> AppResult<()>;
    async fn delete_grant(&self, grant: &Grant) -> AppResult<bool>;

    async fn find_role(&self, name: &str) -> AppResult<Option<Role>>;
    async fn find_role_by_id(&self, id: Uuid) -> AppResult<Option<Role>>;
    async fn list_roles(&self) -> AppResult<Vec<Role>>;
    async fn create_role(&self, name: &str) -> AppResult<Role>;
    /// Renames the role and every grant, membership and identity naming it.
    async fn rename_role(&self, id: Uuid, name: &str) -> AppResult<Role>;
    /// Removes the role with its grants and memberships; returns what was removed.
    async fn delete_role(&self, id: Uuid) -> AppResult<Option<Role>>;

    async fn create_membership(&self, membership: &Membership) -> AppResult<bool>;
    async fn delete_membership(&self, membership: &Membership) -> AppResult<bool>;
    async fn find_memberships(&self, principal: Option<&str>) -> AppResult<Vec<StoredMembership>>;
}

const GRANT_COLUMNS: &str = "id, role, resource, action, created_at";
const ROLE_COLUMNS: &str = "id, name, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqlitePolicyStore {
    pool: SqlitePool,
}

impl SqlitePolicyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_unique(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(message.to_string()),
        _ => AppError::Database(err),
    }
}

fn into_grants(rows: Vec<DbGrant>) -> AppResult<Vec<StoredGrant>> {
    rows.into_iter().map(StoredGrant::try_from).collect()
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn find_grant(&self, grant: &Grant) -> AppResult<Option<StoredGrant>> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM permission_grants WHERE role = ? AND resource = ? AND action = ?"
        );
        sqlx::query_as::<_, DbGrant>(&sql)
            .bind(&grant.role)
            .bind(&grant.resource)
            .bind(grant.action.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(StoredGrant::try_from)
            .transpose()
    }

    async fn find_grant_by_id(&self, id: i64) -> AppResult<Option<StoredGrant>> {
        let sql = format!("SELECT {GRANT_COLUMNS} FROM permission_grants WHERE id = ?");
        sqlx::query_as::<_, DbGrant>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredGrant::try_from)
            .transpose()
    }

    async fn find_grants(&self, filter: &GrantFilter) -> AppResult<Vec<StoredGrant>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {GRANT_COLUMNS} FROM permission_grants WHERE 1 = 1"));
        if let Some(role) = &filter.role {
            query.push(" AND role = ").push_bind(role.clone());
        }
        if let Some(resource) = &filter.resource {
            query.push(" AND resource = ").push_bind(resource.clone());
        }
        if let Some(action) = filter.action {
            query.push(" AND action = ").push_bind(action.as_str());
        }
        query.push(" ORDER BY id");

        let rows = query.build_query_as::<DbGrant>().fetch_all(&self.pool).await?;
        into_grants(rows)
    }

    async fn create_grant(&self, grant: &Grant) -> AppResult<StoredGrant> {
        // the UNIQUE(role, resource, action) constraint settles concurrent adds
        sqlx::query(
            "INSERT INTO permission_grants (role, resource, action, created_at) VALUES (?, ?, ?, ?) ON CONFLICT(role, resource, action) DO NOTHING",
        )
        .bind(&grant.role)
        .bind(&grant.resource)
        .bind(grant.action.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.find_grant(grant)
            .await?
            .ok_or_else(|| AppError::internal(format!("grant {grant} missing after insert")))
    }

    async fn replace_grant(&self, old: &Grant, new: &Grant) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE permission_grants SET role = ?, resource = ?, action = ? WHERE role = ? AND resource = ? AND action = ?",
        )
        .bind(&new.role)
        .bind(&new.resource)
        .bind(new.action.as_str())
        .bind(&old.role)
        .bind(&old.resource)
        .bind(old.action.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|err| map_unique(err, "an identical grant already exists"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::not_found(format!("grant {old} not found")));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_grant(&self, grant: &Grant) -> AppResult<bool> {
        let deleted = sqlx::query("DELETE FROM permission_grants WHERE role = ? AND resource = ? AND action = ?")
            .bind(&grant.role)
            .bind(&grant.resource)
            .bind(grant.action.as_str())
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn find_role(&self, name: &str) -> AppResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = ?");
        sqlx::query_as::<_, DbRole>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(Role::try_from)
            .transpose()
    }

    async fn find_role_by_id(&self, id: Uuid) -> AppResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        sqlx::query_as::<_, DbRole>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(Role::try_from)
            .transpose()
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        sqlx::query_as::<_, DbRole>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Role::try_from)
            .collect()
    }

    async fn create_role(&self, name: &str) -> AppResult<Role> {
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query("INSERT INTO roles (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(role.id.to_string())
            .bind(&role.name)
            .bind(role.created_at)
            .bind(role.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|err| map_unique(err, "role name already exists"))?;

        Ok(role)
    }

    async fn rename_role(&self, id: Uuid, name: &str) -> AppResult<Role> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let current: Role = sqlx::query_as::<_, DbRole>(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?
            .try_into()?;

        let now = Utc::now();
        sqlx::query("UPDATE roles SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|err| map_unique(err, "role name already exists"))?;

        sqlx::query("UPDATE permission_grants SET role = ? WHERE role = ?")
            .bind(name)
            .bind(&current.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE group_memberships SET role = ? WHERE role = ?")
            .bind(name)
            .bind(&current.name)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_unique(err, "membership for the new role name already exists"))?;

        // the new name may already be in use as a plain principal
        sqlx::query("UPDATE group_memberships SET principal = ? WHERE principal = ?")
            .bind(name)
            .bind(&current.name)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_unique(err, "principal with the new role name already holds these memberships"))?;

        sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE role = ?")
            .bind(name)
            .bind(now)
            .bind(&current.name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Role {
            name: name.to_string(),
            updated_at: now,
            ..current
        })
    }

    async fn delete_role(&self, id: Uuid) -> AppResult<Option<Role>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
        let Some(row) = sqlx::query_as::<_, DbRole>(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let role: Role = row.try_into()?;

        sqlx::query("DELETE FROM permission_grants WHERE role = ?")
            .bind(&role.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM group_memberships WHERE role = ? OR principal = ?")
            .bind(&role.name)
            .bind(&role.name)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(role))
    }

    async fn create_membership(&self, membership: &Membership) -> AppResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO group_memberships (principal, role, created_at) VALUES (?, ?, ?) ON CONFLICT(principal, role) DO NOTHING",
        )
        .bind(&membership.principal)
        .bind(&membership.role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn delete_membership(&self, membership: &Membership) -> AppResult<bool> {
        let deleted = sqlx::query("DELETE FROM group_memberships WHERE principal = ? AND role = ?")
            .bind(&membership.principal)
            .bind(&membership.role)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn find_memberships(&self, principal: Option<&str>) -> AppResult<Vec<StoredMembership>> {
        let rows = match principal {
            Some(principal) => {
                sqlx::query_as::<_, StoredMembership>(
                    "SELECT principal, role, created_at FROM group_memberships WHERE principal = ? ORDER BY role",
                )
                .bind(principal)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StoredMembership>(
                    "SELECT principal, role, created_at FROM group_memberships ORDER BY principal, role",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }
}
