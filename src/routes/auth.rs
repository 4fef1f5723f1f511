use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::users::{self, NewUser};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::{ledger, ResetUser};
use crate::mail;
use crate::models::user::{
    ForgotPasswordRequest, IdentityRef, MessageResponse, RegisterRequest, ResetPasswordRequest, SessionResponse,
    SignInRequest, User, VerifyRequest,
};
use crate::utils::{hash_password, verify_password};
use crate::verification::VerificationOutcome;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/new", post(register))
        .route("/verify/:email", post(verify))
        .route("/signin", post(signin))
        .route("/reset/forgotpassword", post(forgot_password))
        .route("/reset/resetpassword", patch(reset_password))
}

#[utoipa::path(
    post,
    path = "/api/user/new",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Leader registered; verification code mailed", body = User),
        (status = 400, description = "A field is blank or the password is too short"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    state.config.fields.require(&[
        ("first_name", &payload.first_name),
        ("last_name", &payload.last_name),
        ("email", &payload.email),
        ("phone", &payload.phone),
        ("password", &payload.password),
    ])?;

    if users::fetch_by_email(&state.pool, &payload.email).await?.is_some() {
        return Err(AppError::conflict("email already in use"));
    }

    let leader = state.config.roles.leader.clone();
    if state.policy.role_named(&leader).await?.is_none() {
        return Err(AppError::configuration(format!("role '{leader}' is not provisioned; run bootstrap first")));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        first_name: payload.first_name,
        last_name: payload.last_name,
        email: payload.email,
        phone: payload.phone,
        password_hash: hash_password(&payload.password)?,
        role: leader.clone(),
        squad_id: None,
        verify_code: Uuid::new_v4().to_string(),
        is_verified: false,
    };

    let now = state.tokens.now();
    let mut tx = state.pool.begin().await?;
    users::insert(&mut *tx, &new_user, now).await?;
    users::insert_membership(&mut *tx, new_user.id, &leader, now).await?;
    let user: User = users::fetch_by_id(&mut *tx, new_user.id)
        .await?
        .ok_or_else(|| AppError::internal("registered user vanished"))?
        .try_into()?;
    tx.commit().await?;

    log_activity(&state.event_bus, "registered", None, &user);

    let mailer = state.mailer.clone();
    let NewUser {
        email,
        first_name,
        verify_code,
        ..
    } = new_user;
    mail::dispatch(state.config.mail_timeout, "verification", async move {
        mailer.send_verification(&email, &first_name, &verify_code).await
    });

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/api/user/verify/{email}",
    tag = "Auth",
    params(("email" = String, Path, description = "Email the code was sent to")),
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Account verified", body = MessageResponse),
        (status = 400, description = "Wrong code; attempts remain"),
        (status = 404, description = "No identity with this email"),
        (status = 409, description = "Already verified"),
        (status = 423, description = "Attempt limit reached; the identity was deleted")
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.config.fields.require(&[("email", &email), ("verify_code", &payload.verify_code)])?;

    let submission = state.verification.submit(&email, &payload.verify_code).await?;
    let subject = IdentityRef {
        id: submission.identity_id,
        email: submission.email,
    };

    match submission.outcome {
        VerificationOutcome::Verified => {
            log_activity(&state.event_bus, "verified", Some(subject.id), &subject);
            Ok(Json(MessageResponse::new("account verified")))
        }
        VerificationOutcome::Rejected { remaining, .. } => Err(AppError::bad_request(format!(
            "invalid verification code, {remaining} attempt(s) remaining"
        ))),
        VerificationOutcome::LockedOut => {
            log_activity(&state.event_bus, "locked_out", None, &subject);
            Err(AppError::locked("too many invalid verification codes; the account was removed"))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/user/signin",
    tag = "Auth",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Session token issued", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not verified")
    )
)]
pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> AppResult<Json<SessionResponse>> {
    state
        .config
        .fields
        .require(&[("email", &payload.email), ("password", &payload.password)])?;

    let db_user = users::fetch_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    if !db_user.is_verified {
        return Err(AppError::forbidden("account is not verified"));
    }

    let user_id = db_user.uuid()?;
    let token = state
        .tokens
        .issue_session_token(user_id, db_user.squad_uuid()?, &db_user.role)?;
    users::touch_last_login(&state.pool, user_id, state.tokens.now()).await?;

    tracing::info!(%user_id, role = %db_user.role, "signed in");
    Ok(Json(SessionResponse { token }))
}

#[utoipa::path(
    post,
    path = "/api/user/reset/forgotpassword",
    tag = "Auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset token mailed", body = MessageResponse),
        (status = 404, description = "No identity with this email")
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.config.fields.require(&[("email", &payload.email)])?;

    let db_user = users::fetch_by_email(&state.pool, &payload.email)
        .await?
        .ok_or_else(|| AppError::not_found("no account for this email"))?;

    let token = state
        .tokens
        .issue_reset_token(db_user.uuid()?, db_user.squad_uuid()?, &db_user.role)?;

    let mailer = state.mailer.clone();
    mail::dispatch(state.config.mail_timeout, "password_reset", async move {
        mailer
            .send_password_reset(&db_user.email, &db_user.first_name, &token)
            .await
    });

    Ok(Json(MessageResponse::new("password reset instructions sent")))
}

#[utoipa::path(
    patch,
    path = "/api/user/reset/resetpassword",
    tag = "Auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Passwords blank, too short or not matching"),
        (status = 401, description = "Reset token missing, invalid, expired or already used")
    ),
    security(("bearerAuth" = []))
)]
pub async fn reset_password(
    State(state): State<AppState>,
    reset: ResetUser,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let claims = reset.claims;
    state.tokens.ensure_unexpired(&claims)?;

    state.config.fields.require(&[
        ("password", &payload.password),
        ("password_confirm", &payload.password_confirm),
    ])?;
    if payload.password != payload.password_confirm {
        return Err(AppError::bad_request("passwords do not match"));
    }
    let password_hash = hash_password(&payload.password)?;

    let now = state.tokens.now();
    let mut tx = state.pool.begin().await?;
    ledger::consume_reset_token(&mut *tx, &claims, now).await?;
    users::update_password(&mut *tx, claims.sub, &password_hash, now).await?;
    tx.commit().await?;

    tracing::info!(user_id = %claims.sub, "password reset");
    Ok(Json(MessageResponse::new("password updated")))
}
