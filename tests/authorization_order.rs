mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::Duration;
use uuid::Uuid;

use squad_access::authz::{PolicyStore, SqlitePolicyStore};
use squad_access::errors::AppResult;
use squad_access::models::rbac::{Grant, GrantFilter, Membership, Role, StoredGrant, StoredMembership};

use common::{spawn_app_with, TestApp};

/// Delegates to SQLite and counts every policy read a decision could make.
struct CountingStore {
    inner: SqlitePolicyStore,
    lookups: Arc<AtomicUsize>,
}

impl CountingStore {
    fn hit(&self) {
        self.lookups.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyStore for CountingStore {
    async fn find_grant(&self, grant: &Grant) -> AppResult<Option<StoredGrant>> {
        self.hit();
        self.inner.find_grant(grant).await
    }

    async fn find_grant_by_id(&self, id: i64) -> AppResult<Option<StoredGrant>> {
        self.inner.find_grant_by_id(id).await
    }

    async fn find_grants(&self, filter: &GrantFilter) -> AppResult<Vec<StoredGrant>> {
        self.hit();
        self.inner.find_grants(filter).await
    }

    async fn create_grant(&self, grant: &Grant) -> AppResult<StoredGrant> {
        self.inner.create_grant(grant).await
    }

    async fn replace_grant(&self, old: &Grant, new: &Grant) -> AppResult<()> {
        self.inner.replace_grant(old, new).await
    }

    async fn delete_grant(&self, grant: &Grant) -> AppResult<bool> {
        self.inner.delete_grant(grant).await
    }

    async fn find_role(&self, name: &str) -> AppResult<Option<Role>> {
        self.inner.find_role(name).await
    }

    async fn find_role_by_id(&self, id: Uuid) -> AppResult<Option<Role>> {
        self.inner.find_role_by_id(id).await
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.inner.list_roles().await
    }

    async fn create_role(&self, name: &str) -> AppResult<Role> {
        self.inner.create_role(name).await
    }

    async fn rename_role(&self, id: Uuid, name: &str) -> AppResult<Role> {
        self.inner.rename_role(id, name).await
    }

    async fn delete_role(&self, id: Uuid) -> AppResult<Option<Role>> {
        self.inner.delete_role(id).await
    }

    async fn create_membership(&self, membership: &Membership) -> AppResult<bool> {
        self.inner.create_membership(membership).await
    }

    async fn delete_membership(&self, membership: &Membership) -> AppResult<bool> {
        self.inner.delete_membership(membership).await
    }

    async fn find_memberships(&self, principal: Option<&str>) -> AppResult<Vec<StoredMembership>> {
        self.hit();
        self.inner.find_memberships(principal).await
    }
}

async fn counted_app() -> Result<(TestApp, Arc<AtomicUsize>)> {
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = lookups.clone();
    let app = spawn_app_with(move |state| {
        let store = CountingStore {
            inner: SqlitePolicyStore::new(state.pool.clone()),
            lookups: counter,
        };
        state.with_policy_store(Arc::new(store))
    })
    .await?;
    Ok((app, lookups))
}

#[tokio::test]
async fn rejected_credentials_never_reach_the_policy_store() -> Result<()> {
    let (app, lookups) = counted_app().await?;
    let (user_id, session) = app.user_with_role("member@example.com", "member").await?;
    let reset = app.state.tokens.issue_reset_token(user_id, None, "member")?;
    let before = lookups.load(Ordering::SeqCst);

    let (status, _) = app.send("GET", "/api/app/role/all", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("GET", "/api/app/role/all", Some("not.a.token"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // a reset token is not a session
    let (status, _) = app.send("GET", "/api/app/role/all", Some(&reset), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.clock.advance(Duration::hours(24));
    let (status, body) = app.send("GET", "/api/user/jwt/me", Some(&session), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token");

    assert_eq!(lookups.load(Ordering::SeqCst), before, "policy consulted for an unauthenticated request");
    Ok(())
}

#[tokio::test]
async fn authenticated_requests_are_then_authorized() -> Result<()> {
    let (app, lookups) = counted_app().await?;
    let (_, session) = app.user_with_role("member@example.com", "member").await?;
    let before = lookups.load(Ordering::SeqCst);

    let (status, body) = app.send("GET", "/api/app/role/all", Some(&session), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert!(lookups.load(Ordering::SeqCst) > before);

    let (status, _) = app.send("GET", "/api/user/jwt/me", Some(&session), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
