#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use squad_access::bootstrap::{self, BootstrapConfig};
use squad_access::config::{AccessConfig, RoleNames};
use squad_access::db::users::{self, NewUser};
use squad_access::errors::AppResult;
use squad_access::jwt::JwtConfig;
use squad_access::mail::Mailer;
use squad_access::models::rbac::Membership;
use squad_access::utils::{hash_password, Clock};
use squad_access::{build_router, AppState};

pub const ROOT_EMAIL: &str = "root@example.com";
pub const ROOT_PASSWORD: &str = "rootpassword";

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub kind: &'static str,
    pub secret: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    /// Mail goes out on a background task, so poll briefly for it.
    pub async fn wait_for(&self, to: &str, kind: &str) -> Option<String> {
        for _ in 0..100 {
            let found = self
                .sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|mail| mail.to == to && mail.kind == kind)
                .map(|mail| mail.secret.clone());
            if found.is_some() {
                return found;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(&self, to_email: &str, _first_name: &str, verify_code: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push(SentMail {
            to: to_email.to_string(),
            kind: "verification",
            secret: verify_code.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset(&self, to_email: &str, _first_name: &str, reset_token: &str) -> AppResult<()> {
        self.sent.lock().unwrap().push(SentMail {
            to: to_email.to_string(),
            kind: "password_reset",
            secret: reset_token.to_string(),
        });
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    _dir: TempDir,
}

pub async fn spawn_app() -> Result<TestApp> {
    spawn_app_with(|state| state).await
}

/// Seeds the default roles, grants and root account, then builds the router
/// from whatever state `customize` returns.
pub async fn spawn_app_with(customize: impl FnOnce(AppState) -> AppState) -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let config = AccessConfig::new(JwtConfig::new("test-secret", 24, 15));
    let clock = Arc::new(ManualClock::new());
    let mailer = Arc::new(RecordingMailer::default());

    let state = AppState::new(pool.clone(), config)
        .with_clock(clock.clone())
        .with_mailer(mailer.clone());

    let seed = BootstrapConfig {
        email: ROOT_EMAIL.to_string(),
        first_name: "Root".to_string(),
        last_name: "Admin".to_string(),
        password: ROOT_PASSWORD.to_string(),
        roles: RoleNames::default(),
    };
    bootstrap::run(&pool, &state.policy, &seed).await?;

    let state = customize(state);
    let router = build_router(state.clone());

    Ok(TestApp {
        router,
        state,
        pool,
        clock,
        mailer,
        _dir: dir,
    })
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.router.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok((status, value))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        let (status, body) = self
            .send(
                "POST",
                "/api/user/signin",
                None,
                Some(serde_json::json!({ "email": email, "password": password })),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "sign in failed: {status} {body}");
        Ok(body["token"].as_str().context("missing token")?.to_string())
    }

    pub async fn root_token(&self) -> Result<String> {
        self.sign_in(ROOT_EMAIL, ROOT_PASSWORD).await
    }

    /// Inserts a verified account holding `role` and returns a session token for it.
    pub async fn user_with_role(&self, email: &str, role: &str) -> Result<(Uuid, String)> {
        let id = Uuid::new_v4();
        let user = NewUser {
            id,
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: email.to_string(),
            phone: "+1 555 0100".to_string(),
            password_hash: hash_password("password123")?,
            role: role.to_string(),
            squad_id: None,
            verify_code: Uuid::new_v4().to_string(),
            is_verified: true,
        };
        users::insert(&self.pool, &user, Utc::now()).await?;
        self.state
            .policy
            .add_group_membership(&Membership::new(id.to_string(), role))
            .await?;

        let token = self.state.tokens.issue_session_token(id, None, role)?;
        Ok((id, token))
    }

    pub async fn verify_code_of(&self, email: &str) -> Result<String> {
        let code: String = sqlx::query_scalar("SELECT verify_code FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(code)
    }
}

pub fn registration(email: &str) -> Value {
    serde_json::json!({
        "first_name": "Ada",
        "last_name": "Lovelace",
        "email": email,
        "phone": "+216 20 000 000",
        "password": "password123"
    })
}
