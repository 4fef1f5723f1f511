mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use squad_access::errors::AppError;
use squad_access::verification::VerificationOutcome;

use common::{registration, spawn_app};

#[tokio::test]
async fn fifth_wrong_code_deletes_the_account() -> Result<()> {
    let app = spawn_app().await?;
    let email = "mallory@example.com";

    let (status, user) = app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let user_id = user["id"].as_str().unwrap_or_default().to_string();
    let uri = format!("/api/user/verify/{email}");

    for remaining in (1..=4).rev() {
        let (status, body) = app.send("POST", &uri, None, Some(json!({ "verify_code": "nope" }))).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
        assert!(body["message"].as_str().unwrap_or_default().contains(&format!("{remaining} attempt")));
    }

    let (status, body) = app.send("POST", &uri, None, Some(json!({ "verify_code": "nope" }))).await?;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "lockout");

    // the identity and its membership are gone
    let (status, _) = app.send("POST", &uri, None, Some(json!({ "verify_code": "nope" }))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM group_memberships WHERE principal = ?")
        .bind(&user_id)
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(remaining, 0);

    let (status, _) = app
        .send("POST", "/api/user/signin", None, Some(json!({ "email": email, "password": "password123" })))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // the address can register again from scratch
    let (status, _) = app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    assert_eq!(status, StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn correct_code_after_misses_still_verifies() -> Result<()> {
    let app = spawn_app().await?;
    let email = "grace@example.com";
    app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    let uri = format!("/api/user/verify/{email}");

    for _ in 0..4 {
        let (status, _) = app.send("POST", &uri, None, Some(json!({ "verify_code": "nope" }))).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let code = app.verify_code_of(email).await?;
    let (status, _) = app.send("POST", &uri, None, Some(json!({ "verify_code": code }))).await?;
    assert_eq!(status, StatusCode::OK);

    let attempts: i64 = sqlx::query_scalar("SELECT attempts FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(attempts, 0);

    Ok(())
}

#[tokio::test]
async fn concurrent_wrong_codes_cannot_outrun_the_limit() -> Result<()> {
    let app = spawn_app().await?;
    let email = "eve@example.com";
    let (status, _) = app.send("POST", "/api/user/new", None, Some(registration(email))).await?;
    assert_eq!(status, StatusCode::CREATED);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = app.state.verification.clone();
            tokio::spawn(async move { tracker.submit(email, "wrong").await })
        })
        .collect();

    let mut rejected = Vec::new();
    let mut locked_out = 0;
    for handle in handles {
        match handle.await? {
            Ok(submission) => match submission.outcome {
                VerificationOutcome::Rejected { attempts, .. } => rejected.push(attempts),
                VerificationOutcome::LockedOut => locked_out += 1,
                VerificationOutcome::Verified => panic!("a wrong code verified the identity"),
            },
            // submissions landing after the delete find nothing
            Err(AppError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    rejected.sort_unstable();
    assert_eq!(rejected, vec![1, 2, 3, 4], "each counted attempt is seen exactly once");
    assert!(locked_out >= 1);

    let left: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(&app.pool)
        .await?;
    assert_eq!(left, 0);

    Ok(())
}
