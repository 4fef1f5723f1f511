use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

use super::{Claims, TokenKind};
use crate::app::AppState;
use crate::errors::AppError;

const BEARER_SCHEME: &str = "Bearer ";

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix(BEARER_SCHEME))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Authorization header must carry a bearer token"))?;

    Ok(token)
}

/// Caller identity from a session token.
///
/// Behind the `authenticate` middleware the claims are already in the request
/// extensions; elsewhere the header is validated here.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role_name: String,
    pub squad_id: Option<Uuid>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role_name: claims.role_name,
            squad_id: claims.squad_id,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<Claims>() {
            return Ok(claims.clone().into());
        }

        let token = bearer_token(&parts.headers)?;
        let claims = state.tokens.validate(token, TokenKind::Session)?;
        Ok(claims.into())
    }
}

/// Claims of a password-reset token presented as a bearer credential.
#[derive(Debug, Clone)]
pub struct ResetUser {
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for ResetUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.tokens.validate(token, TokenKind::Reset)?;
        Ok(ResetUser { claims })
    }
}
