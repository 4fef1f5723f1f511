use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::errors::AppError;
use crate::jwt::JwtConfig;

pub const DEFAULT_MAX_VERIFICATION_ATTEMPTS: u32 = 5;
const DEFAULT_EMPTY_PATTERN: &str = r"^\s*$";

/// Rejects string fields that are empty or match the configured "empty" pattern.
#[derive(Debug, Clone)]
pub struct FieldValidator {
    empty: Arc<Regex>,
}

impl FieldValidator {
    pub fn new(pattern: &str) -> Result<Self, AppError> {
        let empty = Regex::new(pattern)
            .map_err(|err| AppError::configuration(format!("EMPTY_REGEX is not a valid pattern: {err}")))?;
        Ok(Self { empty: Arc::new(empty) })
    }

    pub fn is_blank(&self, value: &str) -> bool {
        value.is_empty() || self.empty.is_match(value)
    }

    /// Fails with a validation error naming the first blank field.
    pub fn require(&self, fields: &[(&str, &str)]) -> Result<(), AppError> {
        match fields.iter().find(|(_, value)| self.is_blank(value)) {
            Some((name, _)) => Err(AppError::bad_request(format!("field '{name}' is invalid"))),
            None => Ok(()),
        }
    }
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self {
            empty: Arc::new(Regex::new(DEFAULT_EMPTY_PATTERN).expect("default empty pattern compiles")),
        }
    }
}

/// Well-known role names assigned by the service itself.
#[derive(Debug, Clone)]
pub struct RoleNames {
    pub root: String,
    pub leader: String,
    pub member: String,
}

impl Default for RoleNames {
    fn default() -> Self {
        Self {
            root: "root".to_string(),
            leader: "leader".to_string(),
            member: "member".to_string(),
        }
    }
}

/// Everything the access-control core needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub jwt: JwtConfig,
    pub fields: FieldValidator,
    pub max_verification_attempts: u32,
    pub roles: RoleNames,
    pub mail_timeout: Duration,
}

impl AccessConfig {
    pub fn new(jwt: JwtConfig) -> Self {
        Self {
            jwt,
            fields: FieldValidator::default(),
            max_verification_attempts: DEFAULT_MAX_VERIFICATION_ATTEMPTS,
            roles: RoleNames::default(),
            mail_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let jwt = JwtConfig::from_env()?;

        let fields = match std::env::var("EMPTY_REGEX") {
            Ok(pattern) if !pattern.is_empty() => FieldValidator::new(&pattern)?,
            _ => FieldValidator::default(),
        };

        let max_verification_attempts = env_parse("MAX_VERIFICATION_ATTEMPTS", DEFAULT_MAX_VERIFICATION_ATTEMPTS)?;
        if max_verification_attempts == 0 {
            return Err(AppError::configuration("MAX_VERIFICATION_ATTEMPTS must be at least 1"));
        }

        let defaults = RoleNames::default();
        let roles = RoleNames {
            root: std::env::var("DEFAULT_ROOT").unwrap_or(defaults.root),
            leader: std::env::var("DEFAULT_LEADER_ROLE").unwrap_or(defaults.leader),
            member: std::env::var("DEFAULT_USER").unwrap_or(defaults.member),
        };

        let mail_timeout = Duration::from_secs(env_parse("MAIL_TIMEOUT_SECS", 10u64)?);

        Ok(Self {
            jwt,
            fields,
            max_verification_attempts,
            roles,
            mail_timeout,
        })
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pattern_rejects_whitespace_only() {
        let fields = FieldValidator::default();
        assert!(fields.is_blank(""));
        assert!(fields.is_blank("   "));
        assert!(!fields.is_blank("roles"));
    }

    #[test]
    fn custom_pattern_is_applied_on_top_of_empty_check() {
        let fields = FieldValidator::new("^(null|none)$").unwrap();
        assert!(fields.is_blank("null"));
        assert!(fields.is_blank(""));
        assert!(!fields.is_blank("  member"));
    }

    #[test]
    fn require_names_offending_field() {
        let fields = FieldValidator::default();
        let err = fields.require(&[("role", "member"), ("resource", " ")]).unwrap_err();
        assert!(err.to_string().contains("resource"));
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let err = FieldValidator::new("(").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
