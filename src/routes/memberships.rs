use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::app::AppState;
use crate::authz::resources;
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{Action, Membership, MembershipQuery, StoredMembership};
use crate::models::user::MessageResponse;

// memberships shape role resolution, so they share the roles grant
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/new", post(add_membership).route_layer(guarded!(state, resources::ROLES, Action::Write)))
        .route("/all", get(list_memberships).route_layer(guarded!(state, resources::ROLES, Action::Read)))
        .route(
            "/:principal/:role",
            delete(remove_membership).route_layer(guarded!(state, resources::ROLES, Action::Write)),
        )
}

#[utoipa::path(
    post,
    path = "/api/app/membership/new",
    tag = "Memberships",
    request_body = Membership,
    responses(
        (status = 201, description = "Membership added", body = Membership),
        (status = 200, description = "Membership already present", body = Membership),
        (status = 404, description = "Role does not exist")
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(membership): Json<Membership>,
) -> AppResult<(StatusCode, Json<Membership>)> {
    if !state.policy.add_group_membership(&membership).await? {
        return Ok((StatusCode::OK, Json(membership)));
    }

    log_activity(&state.event_bus, "created", Some(auth.user_id), &membership);
    Ok((StatusCode::CREATED, Json(membership)))
}

#[utoipa::path(
    get,
    path = "/api/app/membership/all",
    tag = "Memberships",
    params(("principal" = Option<String>, Query, description = "Only memberships of this principal")),
    responses((status = 200, description = "Memberships", body = Vec<StoredMembership>)),
    security(("bearerAuth" = []))
)]
pub async fn list_memberships(
    State(state): State<AppState>,
    Query(query): Query<MembershipQuery>,
) -> AppResult<Json<Vec<StoredMembership>>> {
    Ok(Json(state.policy.memberships(query.principal.as_deref()).await?))
}

#[utoipa::path(
    delete,
    path = "/api/app/membership/{principal}/{role}",
    tag = "Memberships",
    params(
        ("principal" = String, Path, description = "User id or role name"),
        ("role" = String, Path, description = "Role the principal belongs to")
    ),
    responses(
        (status = 200, description = "Membership removed", body = MessageResponse),
        (status = 404, description = "No such membership")
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((principal, role)): Path<(String, String)>,
) -> AppResult<Json<MessageResponse>> {
    let membership = Membership::new(principal, role);
    state.policy.remove_group_membership(&membership).await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &membership);
    Ok(Json(MessageResponse::new("membership removed")))
}
