use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::resources;
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{Action, Role, RoleRequest};
use crate::models::user::MessageResponse;

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/new", post(create_role).route_layer(guarded!(state, resources::ROLES, Action::Write)))
        .route("/all", get(list_roles).route_layer(guarded!(state, resources::ROLES, Action::Read)))
        .route("/:id", put(rename_role).route_layer(guarded!(state, resources::ROLES, Action::Write)))
        .route("/:id", delete(delete_role).route_layer(guarded!(state, resources::ROLES, Action::Write)))
}

#[utoipa::path(
    post,
    path = "/api/app/role/new",
    tag = "Roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 403, description = "Role lacks (roles, write)"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RoleRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let role = state.policy.create_role(&req.name).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &role);
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/api/app/role/all",
    tag = "Roles",
    responses((status = 200, description = "All roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(state.policy.list_roles().await?))
}

/// Rename a role; its grants, memberships and assigned users follow.
#[utoipa::path(
    put,
    path = "/api/app/role/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role renamed", body = Role),
        (status = 404, description = "No such role"),
        (status = 409, description = "Role name already exists")
    ),
    security(("bearerAuth" = []))
)]
pub async fn rename_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> AppResult<Json<Role>> {
    let role = state.policy.rename_role(id, &req.name).await?;
    log_activity(&state.event_bus, "renamed", Some(auth.user_id), &role);
    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/api/app/role/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role and its grants removed", body = MessageResponse),
        (status = 404, description = "No such role")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let role = state.policy.delete_role(id).await?;
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &role);
    Ok(Json(MessageResponse::new(format!("role '{}' deleted", role.name))))
}
