/// Per-route policy gate: `guarded!(state, resource, action)` yields a layer
/// that rejects callers whose roles lack the grant. Route layers run inside the
/// router-wide `authenticate` layer, so claims are already present.
macro_rules! guarded {
    ($state:expr, $resource:expr, $action:expr) => {
        axum::middleware::from_fn_with_state(
            $state.clone(),
            move |state: axum::extract::State<$crate::app::AppState>,
                  req: axum::extract::Request,
                  next: axum::middleware::Next| {
                $crate::authz::gate::require_grant(state, $resource, $action, req, next)
            },
        )
    };
}

pub mod auth;
pub mod health;
pub mod memberships;
pub mod permissions;
pub mod roles;
pub mod users;
