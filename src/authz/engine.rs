use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use super::store::PolicyStore;
use crate::config::FieldValidator;
use crate::errors::{AppError, AppResult};
use crate::jwt::Claims;
use crate::models::rbac::{Action, Grant, GrantFilter, Membership, Role, StoredGrant, StoredMembership};

/// Bound on group-membership chains followed when resolving roles.
pub const MAX_ROLE_DEPTH: usize = 10;

/// Role-based decisions plus the administrative operations on grants,
/// roles and memberships. Every mutation goes through the store, so the
/// engine itself holds no policy state.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    fields: FieldValidator,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>, fields: FieldValidator) -> Self {
        Self { store, fields }
    }

    fn validate_grant(&self, grant: &Grant) -> AppResult<()> {
        self.fields.require(&[("role", &grant.role), ("resource", &grant.resource)])
    }

    async fn ensure_role_exists(&self, name: &str) -> AppResult<Role> {
        self.store
            .find_role(name)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role '{name}' does not exist")))
    }

    // ---------------------------------------------------------------------
    // grants
    // ---------------------------------------------------------------------

    pub async fn has_grant(&self, grant: &Grant) -> AppResult<bool> {
        self.validate_grant(grant)?;
        Ok(self.store.find_grant(grant).await?.is_some())
    }

    /// Idempotent: adding an existing triple returns it with `false`.
    pub async fn add_grant(&self, grant: &Grant) -> AppResult<(StoredGrant, bool)> {
        self.validate_grant(grant)?;
        self.ensure_role_exists(&grant.role).await?;

        if let Some(existing) = self.store.find_grant(grant).await? {
            tracing::debug!(%grant, "grant already present");
            return Ok((existing, false));
        }

        let stored = self.store.create_grant(grant).await?;
        tracing::info!(%grant, id = stored.id, "grant added");
        Ok((stored, true))
    }

    /// Replaces `old` with `new`; only the role and action may change.
    pub async fn update_grant(&self, old: &Grant, new: &Grant) -> AppResult<StoredGrant> {
        self.validate_grant(old)?;
        self.validate_grant(new)?;

        if old.resource != new.resource {
            return Err(AppError::bad_request(format!(
                "invalid edit: resource cannot change from '{}' to '{}'",
                old.resource, new.resource
            )));
        }

        if self.store.find_grant(old).await?.is_none() {
            return Err(AppError::not_found(format!("grant {old} not found")));
        }

        if old != new {
            self.ensure_role_exists(&new.role).await?;
            if self.store.find_grant(new).await?.is_some() {
                return Err(AppError::conflict(format!("grant {new} already exists")));
            }
            self.store.replace_grant(old, new).await?;
            tracing::info!(old = %old, new = %new, "grant updated");
        }

        self.store
            .find_grant(new)
            .await?
            .ok_or_else(|| AppError::internal(format!("grant {new} missing after update")))
    }

    pub async fn remove_grant(&self, grant: &Grant) -> AppResult<()> {
        self.validate_grant(grant)?;
        if !self.store.delete_grant(grant).await? {
            return Err(AppError::not_found(format!("grant {grant} not found")));
        }
        tracing::info!(%grant, "grant removed");
        Ok(())
    }

    pub async fn grant_by_id(&self, id: i64) -> AppResult<StoredGrant> {
        self.store
            .find_grant_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("permission not found"))
    }

    pub async fn list_grants(&self, filter: &GrantFilter) -> AppResult<Vec<StoredGrant>> {
        self.store.find_grants(filter).await
    }

    // ---------------------------------------------------------------------
    // decisions
    // ---------------------------------------------------------------------

    /// Seeds plus every role reachable through group memberships.
    pub async fn effective_roles(&self, seeds: &[&str]) -> AppResult<BTreeSet<String>> {
        let mut resolved: BTreeSet<String> = BTreeSet::new();
        let mut frontier: Vec<String> = Vec::new();

        for seed in seeds.iter().filter(|seed| !self.fields.is_blank(seed)) {
            if resolved.insert(seed.to_string()) {
                frontier.push(seed.to_string());
            }
        }

        for _ in 0..MAX_ROLE_DEPTH {
            if frontier.is_empty() {
                break;
            }

            let mut next = Vec::new();
            for principal in &frontier {
                for membership in self.store.find_memberships(Some(principal)).await? {
                    if resolved.insert(membership.role.clone()) {
                        next.push(membership.role);
                    }
                }
            }
            frontier = next;
        }

        Ok(resolved)
    }

    /// Whether `role` (or anything it inherits) holds `action` on `resource`.
    pub async fn check(&self, role: &str, resource: &str, action: Action) -> AppResult<bool> {
        self.decide(&[role], resource, action).await
    }

    async fn decide(&self, seeds: &[&str], resource: &str, action: Action) -> AppResult<bool> {
        if self.fields.is_blank(resource) {
            return Err(AppError::bad_request("field 'resource' is invalid"));
        }

        let roles = self.effective_roles(seeds).await?;
        if roles.is_empty() {
            return Ok(false);
        }

        let candidates = self.store.find_grants(&GrantFilter::for_decision(resource, action)).await?;
        let allowed = candidates.iter().any(|grant| roles.contains(&grant.role));

        tracing::debug!(?roles, resource, %action, allowed, "policy decision");
        Ok(allowed)
    }

    /// Decision for an authenticated caller; the role claim and the subject id
    /// both seed role resolution.
    pub async fn authorize(&self, claims: &Claims, resource: &str, action: Action) -> AppResult<()> {
        let subject = claims.sub.to_string();
        if self.decide(&[claims.role_name.as_str(), subject.as_str()], resource, action).await? {
            return Ok(());
        }

        tracing::info!(user_id = %claims.sub, role = %claims.role_name, resource, %action, "access denied");
        Err(AppError::forbidden(format!(
            "role '{}' may not {} {}",
            claims.role_name, action, resource
        )))
    }

    // ---------------------------------------------------------------------
    // roles
    // ---------------------------------------------------------------------

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.store.list_roles().await
    }

    pub async fn role_named(&self, name: &str) -> AppResult<Option<Role>> {
        self.store.find_role(name).await
    }

    pub async fn create_role(&self, name: &str) -> AppResult<Role> {
        self.fields.require(&[("name", name)])?;
        if self.store.find_role(name).await?.is_some() {
            return Err(AppError::conflict(format!("role '{name}' already exists")));
        }

        let role = self.store.create_role(name).await?;
        tracing::info!(role = %role.name, "role created");
        Ok(role)
    }

    /// Renames a role; grants, memberships and assigned identities follow.
    pub async fn rename_role(&self, id: Uuid, name: &str) -> AppResult<Role> {
        self.fields.require(&[("name", name)])?;

        let current = self
            .store
            .find_role_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;

        if current.name == name {
            return Ok(current);
        }

        if self.store.find_role(name).await?.is_some() {
            return Err(AppError::conflict(format!("role '{name}' already exists")));
        }

        let role = self.store.rename_role(id, name).await?;
        tracing::info!(from = %current.name, to = %role.name, "role renamed");
        Ok(role)
    }

    pub async fn delete_role(&self, id: Uuid) -> AppResult<Role> {
        let role = self
            .store
            .delete_role(id)
            .await?
            .ok_or_else(|| AppError::not_found("role not found"))?;

        tracing::info!(role = %role.name, "role deleted with its grants and memberships");
        Ok(role)
    }

    // ---------------------------------------------------------------------
    // memberships
    // ---------------------------------------------------------------------

    pub async fn add_group_membership(&self, membership: &Membership) -> AppResult<bool> {
        self.fields
            .require(&[("principal", &membership.principal), ("role", &membership.role)])?;

        if membership.principal == membership.role {
            return Err(AppError::bad_request("a role cannot be a member of itself"));
        }

        self.ensure_role_exists(&membership.role).await?;
        self.store.create_membership(membership).await
    }

    pub async fn remove_group_membership(&self, membership: &Membership) -> AppResult<()> {
        if !self.store.delete_membership(membership).await? {
            return Err(AppError::not_found(format!(
                "'{}' is not a member of '{}'",
                membership.principal, membership.role
            )));
        }
        Ok(())
    }

    pub async fn memberships(&self, principal: Option<&str>) -> AppResult<Vec<StoredMembership>> {
        self.store.find_memberships(principal).await
    }
}
