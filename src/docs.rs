use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes::{auth, health, memberships, permissions, roles, users};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		auth::register,
		auth::verify,
		auth::signin,
		auth::forgot_password,
		auth::reset_password,
		users::list_users,
		users::me,
		users::get_user,
		users::users_by_role,
		users::users_by_squad,
		users::delete_user,
		users::change_role,
		roles::create_role,
		roles::list_roles,
		roles::rename_role,
		roles::delete_role,
		permissions::add_permission,
		permissions::list_permissions,
		permissions::get_permission,
		permissions::update_permission,
		permissions::remove_permission,
		memberships::add_membership,
		memberships::list_memberships,
		memberships::remove_membership
	),
	components(
		schemas(
			health::HealthResponse,
			models::user::User,
			models::user::RegisterRequest,
			models::user::SignInRequest,
			models::user::SessionResponse,
			models::user::VerifyRequest,
			models::user::ForgotPasswordRequest,
			models::user::ResetPasswordRequest,
			models::user::RoleChangeRequest,
			models::user::MessageResponse,
			models::rbac::Action,
			models::rbac::Role,
			models::rbac::RoleRequest,
			models::rbac::Grant,
			models::rbac::GrantRequest,
			models::rbac::StoredGrant,
			models::rbac::Membership,
			models::rbac::StoredMembership
		)
	),
	modifiers(&BearerAuth),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Auth", description = "Registration, verification, sign-in and password reset"),
		(name = "Users", description = "User administration"),
		(name = "Roles", description = "Role administration"),
		(name = "Permissions", description = "Permission grants"),
		(name = "Memberships", description = "Group memberships used for role resolution")
	)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		let components = openapi.components.get_or_insert_with(Default::default);
		components.add_security_scheme(
			"bearerAuth",
			SecurityScheme::Http(
				HttpBuilder::new()
					.scheme(HttpAuthScheme::Bearer)
					.bearer_format("JWT")
					.build(),
			),
		);
	}
}

pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
	let mut doc = ApiDoc::openapi();
	if doc.servers.is_none() {
		doc.servers = Some(vec![Server::new(format!("http://localhost:{port}"))]);
	}
	doc
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}
