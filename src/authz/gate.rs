use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::{bearer_token, Claims, TokenKind};
use crate::models::rbac::Action;

/// Validates the session token and stashes its claims for later layers and
/// extractors. Runs before any policy lookup.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let claims = {
        let token = bearer_token(req.headers())?;
        state.tokens.validate(token, TokenKind::Session)
    };

    let claims = claims.map_err(|err| {
        tracing::debug!(error = %err, path = %req.uri().path(), "session token rejected");
        err
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Allows the request through only if the caller's roles grant `action` on `resource`.
pub async fn require_grant(
    State(state): State<AppState>,
    resource: &'static str,
    action: Action,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("request was not authenticated"))?;

    state.policy.authorize(&claims, resource, action).await?;
    Ok(next.run(req).await)
}
