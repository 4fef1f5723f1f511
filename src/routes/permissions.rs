use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::authz::resources;
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{Action, GrantFilter, GrantRequest, StoredGrant};
use crate::models::user::MessageResponse;

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/new", post(add_permission).route_layer(guarded!(state, resources::PERMISSIONS, Action::Write)))
        .route("/all", get(list_permissions).route_layer(guarded!(state, resources::PERMISSIONS, Action::Read)))
        .route("/:id", get(get_permission).route_layer(guarded!(state, resources::PERMISSIONS, Action::Read)))
        .route("/:id", put(update_permission).route_layer(guarded!(state, resources::PERMISSIONS, Action::Write)))
        .route(
            "/:id",
            delete(remove_permission).route_layer(guarded!(state, resources::PERMISSIONS, Action::Write)),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionQuery {
    pub role: Option<String>,
    pub resource: Option<String>,
}

/// Add a grant. Adding a grant that already exists returns it with 200.
#[utoipa::path(
    post,
    path = "/api/app/permission/new",
    tag = "Permissions",
    request_body = GrantRequest,
    responses(
        (status = 201, description = "Grant added", body = StoredGrant),
        (status = 200, description = "Grant already present", body = StoredGrant),
        (status = 400, description = "Blank field or unknown action"),
        (status = 404, description = "Role does not exist")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<GrantRequest>,
) -> AppResult<(StatusCode, Json<StoredGrant>)> {
    let grant = req.into_grant()?;
    let (stored, created) = state.policy.add_grant(&grant).await?;

    if !created {
        return Ok((StatusCode::OK, Json(stored)));
    }

    log_activity(&state.event_bus, "created", Some(auth.user_id), &stored);
    Ok((StatusCode::CREATED, Json(stored)))
}

#[utoipa::path(
    get,
    path = "/api/app/permission/all",
    tag = "Permissions",
    params(PermissionQuery),
    responses((status = 200, description = "Grants matching the filter", body = Vec<StoredGrant>)),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    Query(query): Query<PermissionQuery>,
) -> AppResult<Json<Vec<StoredGrant>>> {
    let filter = GrantFilter {
        role: query.role,
        resource: query.resource,
        action: None,
    };
    Ok(Json(state.policy.list_grants(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/app/permission/{id}",
    tag = "Permissions",
    params(("id" = i64, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant", body = StoredGrant),
        (status = 404, description = "No such grant")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_permission(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<StoredGrant>> {
    Ok(Json(state.policy.grant_by_id(id).await?))
}

/// Replace the stored grant with the given one; the resource may not change.
#[utoipa::path(
    put,
    path = "/api/app/permission/{id}",
    tag = "Permissions",
    params(("id" = i64, Path, description = "Grant id")),
    request_body = GrantRequest,
    responses(
        (status = 200, description = "Grant updated", body = StoredGrant),
        (status = 400, description = "Resource changed, blank field or unknown action"),
        (status = 404, description = "No such grant or role"),
        (status = 409, description = "The new grant already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<GrantRequest>,
) -> AppResult<Json<StoredGrant>> {
    let old = state.policy.grant_by_id(id).await?.grant();
    let new = req.into_grant()?;

    let updated = state.policy.update_grant(&old, &new).await?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &updated);
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/app/permission/{id}",
    tag = "Permissions",
    params(("id" = i64, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant removed", body = MessageResponse),
        (status = 404, description = "No such grant")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<MessageResponse>> {
    let stored = state.policy.grant_by_id(id).await?;
    state.policy.remove_grant(&stored.grant()).await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &stored);
    Ok(Json(MessageResponse::new(format!("grant {} removed", stored.grant()))))
}
