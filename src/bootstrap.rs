//! Idempotent seeding of the well-known roles, the default grant matrix, and
//! the verified root identity.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::{resources, PolicyEngine};
use crate::config::RoleNames;
use crate::db::users::{self, NewUser};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Action, Grant, Membership};
use crate::utils::{hash_password, utc_now};

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub roles: RoleNames,
}

impl BootstrapConfig {
    pub fn from_env(roles: RoleNames) -> Result<Self, AppError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| AppError::configuration(format!("{key} not set")))
        };

        Ok(Self {
            email: required("DEFAULT_EMAIL")?,
            first_name: std::env::var("DEFAULT_FIRSTNAME").unwrap_or_else(|_| "Root".to_string()),
            last_name: std::env::var("DEFAULT_LASTNAME").unwrap_or_else(|_| "Admin".to_string()),
            password: required("DEFAULT_USER_PASSWORD")?,
            roles,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub roles_created: usize,
    pub grants_created: usize,
    pub root_created: bool,
}

pub fn default_grants(roles: &RoleNames) -> Vec<Grant> {
    let mut grants = Vec::new();
    for resource in resources::ALL {
        grants.push(Grant::new(roles.root.as_str(), resource, Action::Read));
        grants.push(Grant::new(roles.root.as_str(), resource, Action::Write));
    }
    grants.push(Grant::new(roles.leader.as_str(), resources::FRONT, Action::Read));
    grants.push(Grant::new(roles.leader.as_str(), resources::USERS, Action::Read));
    grants.push(Grant::new(roles.member.as_str(), resources::FRONT, Action::Read));
    grants
}

pub async fn run(pool: &SqlitePool, policy: &PolicyEngine, config: &BootstrapConfig) -> AppResult<BootstrapReport> {
    let mut report = BootstrapReport::default();
    let roles = &config.roles;

    for name in [&roles.root, &roles.leader, &roles.member] {
        if policy.role_named(name).await?.is_none() {
            policy.create_role(name).await?;
            report.roles_created += 1;
        }
    }

    for grant in default_grants(roles) {
        let (_, created) = policy.add_grant(&grant).await?;
        if created {
            report.grants_created += 1;
        }
    }

    let root_id = match users::fetch_by_email(pool, &config.email).await? {
        Some(existing) => existing.uuid()?,
        None => {
            let root = NewUser {
                id: Uuid::new_v4(),
                first_name: config.first_name.clone(),
                last_name: config.last_name.clone(),
                email: config.email.clone(),
                phone: String::new(),
                password_hash: hash_password(&config.password)?,
                role: roles.root.clone(),
                squad_id: None,
                verify_code: Uuid::new_v4().to_string(),
                is_verified: true,
            };
            users::insert(pool, &root, utc_now()).await?;
            report.root_created = true;
            root.id
        }
    };

    policy
        .add_group_membership(&Membership::new(root_id.to_string(), roles.root.clone()))
        .await?;

    tracing::info!(
        roles = report.roles_created,
        grants = report.grants_created,
        root_created = report.root_created,
        "bootstrap complete"
    );
    Ok(report)
}
