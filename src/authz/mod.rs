//! Authorization: the grant store, the policy engine, and the request gates
//! that put authentication in front of every policy decision.

mod engine;
pub mod gate;
mod store;

pub use engine::{PolicyEngine, MAX_ROLE_DEPTH};
pub use store::{PolicyStore, SqlitePolicyStore};

/// Resources guarded by the HTTP surface.
pub mod resources {
    pub const ROLES: &str = "roles";
    pub const PERMISSIONS: &str = "permissions";
    pub const USERS: &str = "users";
    pub const FRONT: &str = "front";

    pub const ALL: [&str; 4] = [ROLES, PERMISSIONS, USERS, FRONT];
}
