use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// ACTION
// =============================================================================

/// The closed set of actions a grant can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            other => Err(AppError::bad_request(format!("permission is invalid: action '{other}' must be read or write"))),
        }
    }
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> String { self.id.to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: Uuid::parse_str(&db.id).map_err(|e| AppError::internal(format!("invalid role id: {e}")))?,
            name: db.name,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRequest {
    #[schema(example = "treasurer")]
    pub name: String,
}

// =============================================================================
// PERMISSION GRANT
// =============================================================================

/// A (role, resource, action) triple; identity is the whole triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Grant {
    pub role: String,
    pub resource: String,
    pub action: Action,
}

impl Grant {
    pub fn new(role: impl Into<String>, resource: impl Into<String>, action: Action) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            action,
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.role, self.resource, self.action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredGrant {
    pub id: i64,
    pub role: String,
    pub resource: String,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

impl StoredGrant {
    pub fn grant(&self) -> Grant {
        Grant::new(self.role.clone(), self.resource.clone(), self.action)
    }
}

impl Loggable for StoredGrant {
    fn entity_type() -> &'static str { "grant" }
    fn subject_id(&self) -> String { self.id.to_string() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbGrant {
    pub id: i64,
    pub role: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbGrant> for StoredGrant {
    type Error = AppError;

    fn try_from(db: DbGrant) -> Result<Self, Self::Error> {
        let action = db
            .action
            .parse::<Action>()
            .map_err(|_| AppError::internal(format!("stored grant {} has an unknown action", db.id)))?;

        Ok(StoredGrant {
            id: db.id,
            role: db.role,
            resource: db.resource,
            action,
            created_at: db.created_at,
        })
    }
}

/// Wire shape of a grant; the action is parsed so unknown values are a
/// validation error rather than a deserialization failure.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRequest {
    #[schema(example = "leader")]
    pub role: String,
    #[schema(example = "users")]
    pub resource: String,
    #[schema(example = "read")]
    pub action: String,
}

impl GrantRequest {
    pub fn into_grant(self) -> Result<Grant, AppError> {
        let action = self.action.parse::<Action>()?;
        Ok(Grant::new(self.role, self.resource, action))
    }
}

/// FindMany filter over grants; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
    pub role: Option<String>,
    pub resource: Option<String>,
    pub action: Option<Action>,
}

impl GrantFilter {
    pub fn for_decision(resource: &str, action: Action) -> Self {
        Self {
            role: None,
            resource: Some(resource.to_string()),
            action: Some(action),
        }
    }

    pub fn for_role(role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Self::default()
        }
    }
}

// =============================================================================
// GROUP MEMBERSHIP
// =============================================================================

/// Associates a principal (user id or role name) with a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Membership {
    #[schema(example = "6c1f0e9e-4b9c-4b8e-9a57-6f3f2f0b2d11")]
    pub principal: String,
    #[schema(example = "leader")]
    pub role: String,
}

impl Membership {
    pub fn new(principal: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            role: role.into(),
        }
    }
}

impl Loggable for Membership {
    fn entity_type() -> &'static str { "membership" }
    fn subject_id(&self) -> String { self.principal.clone() }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StoredMembership {
    pub principal: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MembershipQuery {
    pub principal: Option<String>,
}
