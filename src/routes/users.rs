use axum::extract::{Path, State};
use axum::routing::{delete, get, patch};
use axum::{Json, Router};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::resources;
use crate::db::users::{self, UserFilter};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::Action;
use crate::models::user::{MessageResponse, RoleChangeRequest, User};

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/allusers", get(list_users).route_layer(guarded!(state, resources::USERS, Action::Read)))
        .route("/me", get(me).route_layer(guarded!(state, resources::FRONT, Action::Read)))
        .route("/role/:role", get(users_by_role).route_layer(guarded!(state, resources::USERS, Action::Read)))
        .route(
            "/squad/:squad_id",
            get(users_by_squad).route_layer(guarded!(state, resources::USERS, Action::Read)),
        )
        .route("/:id", get(get_user).route_layer(guarded!(state, resources::USERS, Action::Read)))
        .route("/:id", delete(delete_user).route_layer(guarded!(state, resources::USERS, Action::Write)))
        .route("/:id/role", patch(change_role).route_layer(guarded!(state, resources::USERS, Action::Write)))
}

async fn load_users(state: &AppState, filter: UserFilter) -> AppResult<Vec<User>> {
    users::list(&state.pool, &filter)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
}

async fn load_user(state: &AppState, id: Uuid) -> AppResult<User> {
    users::fetch_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()
}

#[utoipa::path(
    get,
    path = "/api/user/jwt/allusers",
    tag = "Users",
    responses(
        (status = 200, description = "All users", body = Vec<User>),
        (status = 401, description = "Missing or invalid session token"),
        (status = 403, description = "Role lacks (users, read)")
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    Ok(Json(load_users(&state, UserFilter::default()).await?))
}

#[utoipa::path(
    get,
    path = "/api/user/jwt/me",
    tag = "Users",
    responses(
        (status = 200, description = "The signed-in user", body = User),
        (status = 401, description = "Missing or invalid session token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    Ok(Json(load_user(&state, auth.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/user/jwt/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "No such user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<User>> {
    Ok(Json(load_user(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/api/user/jwt/role/{role}",
    tag = "Users",
    params(("role" = String, Path, description = "Role name")),
    responses((status = 200, description = "Users holding the role", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
pub async fn users_by_role(State(state): State<AppState>, Path(role): Path<String>) -> AppResult<Json<Vec<User>>> {
    let filter = UserFilter {
        role: Some(role),
        ..UserFilter::default()
    };
    Ok(Json(load_users(&state, filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/user/jwt/squad/{squad_id}",
    tag = "Users",
    params(("squad_id" = Uuid, Path, description = "Squad id")),
    responses((status = 200, description = "Users in the squad", body = Vec<User>)),
    security(("bearerAuth" = []))
)]
pub async fn users_by_squad(State(state): State<AppState>, Path(squad_id): Path<Uuid>) -> AppResult<Json<Vec<User>>> {
    let filter = UserFilter {
        squad_id: Some(squad_id),
        ..UserFilter::default()
    };
    Ok(Json(load_users(&state, filter).await?))
}

#[utoipa::path(
    delete,
    path = "/api/user/jwt/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 404, description = "No such user")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let user = load_user(&state, id).await?;

    let mut tx = state.pool.begin().await?;
    users::delete_memberships_of(&mut *tx, id).await?;
    users::delete(&mut *tx, id).await?;
    tx.commit().await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &user);
    Ok(Json(MessageResponse::new("user deleted")))
}

#[utoipa::path(
    patch,
    path = "/api/user/jwt/{id}/role",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = RoleChangeRequest,
    responses(
        (status = 200, description = "Role changed", body = User),
        (status = 404, description = "No such user or role")
    ),
    security(("bearerAuth" = []))
)]
pub async fn change_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleChangeRequest>,
) -> AppResult<Json<User>> {
    state.config.fields.require(&[("role", &payload.role)])?;

    let current = load_user(&state, id).await?;
    if state.policy.role_named(&payload.role).await?.is_none() {
        return Err(AppError::not_found(format!("role '{}' does not exist", payload.role)));
    }

    let now = state.tokens.now();
    let mut tx = state.pool.begin().await?;
    users::update_role(&mut *tx, id, &payload.role, now).await?;
    users::delete_membership(&mut *tx, id, &current.role).await?;
    users::insert_membership(&mut *tx, id, &payload.role, now).await?;
    tx.commit().await?;

    let user = load_user(&state, id).await?;
    log_activity(&state.event_bus, "role_changed", Some(auth.user_id), &user);
    Ok(Json(user))
}
