mod common;

use anyhow::Result;
use serde_json::json;

use common::{registration, spawn_app, TestApp};

/// Makes every membership insert fail until the trigger is dropped again.
async fn freeze_memberships(app: &TestApp) -> Result<()> {
    sqlx::query(
        "CREATE TRIGGER freeze_memberships BEFORE INSERT ON group_memberships \
         BEGIN SELECT RAISE(ABORT, 'memberships are frozen'); END",
    )
    .execute(&app.pool)
    .await?;
    Ok(())
}

async fn thaw_memberships(app: &TestApp) -> Result<()> {
    sqlx::query("DROP TRIGGER freeze_memberships").execute(&app.pool).await?;
    Ok(())
}

#[tokio::test]
async fn failed_registration_leaves_no_identity_behind() -> Result<()> {
    let app = spawn_app().await?;
    let email = "ada@example.com";

    freeze_memberships(&app).await?;
    let (status, _) = app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    assert!(status.is_server_error(), "{status}");

    let users: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(users, 0);

    thaw_memberships(&app).await?;
    let (status, _) = app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    assert!(status.is_success(), "{status}");

    Ok(())
}

#[tokio::test]
async fn failed_role_change_keeps_role_and_membership() -> Result<()> {
    let app = spawn_app().await?;
    let root = app.root_token().await?;
    let (member_id, _) = app.user_with_role("member@example.com", "member").await?;
    let uri = format!("/api/user/jwt/{member_id}/role");

    freeze_memberships(&app).await?;
    let (status, _) = app.send("PATCH", &uri, Some(&root), Some(json!({ "role": "leader" }))).await?;
    assert!(status.is_server_error(), "{status}");

    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(member_id.to_string())
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(role, "member");

    let memberships: Vec<String> = sqlx::query_scalar("SELECT role FROM group_memberships WHERE principal = ?")
        .bind(member_id.to_string())
        .fetch_all(&app.pool)
        .await?;
    assert_eq!(memberships, vec!["member".to_string()]);

    thaw_memberships(&app).await?;
    let (status, user) = app.send("PATCH", &uri, Some(&root), Some(json!({ "role": "leader" }))).await?;
    assert!(status.is_success(), "{status}");
    assert_eq!(user["role"], "leader");

    Ok(())
}
