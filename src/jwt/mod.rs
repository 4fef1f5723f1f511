//! Signed-claims tokens for sessions and password resets.
//!
//! Both kinds are HMAC-signed with the same secret and carry the same fixed
//! claim shape; they differ in validity window and in the `kind` claim, which
//! keeps a reset link from being replayed as a session and vice versa.

mod extract;
pub mod ledger;

pub use extract::{bearer_token, AuthUser, ResetUser};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::env_parse;
use crate::errors::{AppError, AppResult};
use crate::utils::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub session_hours: i64,
    pub reset_minutes: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>, session_hours: i64, reset_minutes: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            session_hours,
            reset_minutes,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("TOKEN_SECRET").map_err(|_| AppError::configuration("TOKEN_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("TOKEN_SECRET must not be empty"));
        }

        let session_hours = env_parse("TOKEN_DURATION", 24i64)?;
        let reset_minutes = env_parse("RESET_TOKEN_DURATION", 15i64)?;
        if session_hours <= 0 || reset_minutes <= 0 {
            return Err(AppError::configuration("token durations must be positive"));
        }

        Ok(Self::new(secret.into_bytes(), session_hours, reset_minutes))
    }

    pub fn validity(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Session => Duration::hours(self.session_hours),
            TokenKind::Reset => Duration::minutes(self.reset_minutes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Reset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::Reset => "reset",
        }
    }
}

/// Fixed claim set; a token whose payload has any other shape is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub sub: Uuid,
    pub role_name: String,
    pub squad_id: Option<Uuid>,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> AppResult<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.exp, 0).ok_or_else(|| AppError::token("exp is out of range"))
    }
}

#[derive(Clone)]
pub struct TokenService {
    config: JwtConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: JwtConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: JwtConfig, clock: Arc<dyn Clock>) -> Self {
        let encoding = EncodingKey::from_secret(&config.secret);
        let decoding = DecodingKey::from_secret(&config.secret);
        Self {
            config,
            encoding,
            decoding,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn issue_session_token(&self, subject: Uuid, squad_id: Option<Uuid>, role: &str) -> AppResult<String> {
        self.issue(TokenKind::Session, subject, squad_id, role)
    }

    pub fn issue_reset_token(&self, subject: Uuid, squad_id: Option<Uuid>, role: &str) -> AppResult<String> {
        self.issue(TokenKind::Reset, subject, squad_id, role)
    }

    fn issue(&self, kind: TokenKind, subject: Uuid, squad_id: Option<Uuid>, role: &str) -> AppResult<String> {
        let now = self.clock.now();
        let exp = now + self.config.validity(kind);

        let claims = Claims {
            sub: subject,
            role_name: role.to_string(),
            squad_id,
            kind,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::token(err.to_string()))
    }

    /// Verifies signature, algorithm family, claim shape, kind and expiry.
    pub fn validate(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &hmac_validation())
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))?;

        if claims.kind != kind {
            return Err(AppError::token(format!(
                "expected a {} token, got a {} token",
                kind.as_str(),
                claims.kind.as_str()
            )));
        }

        self.ensure_unexpired(&claims)?;
        Ok(claims)
    }

    /// Expiry check against the service clock, with no leeway.
    pub fn ensure_unexpired(&self, claims: &Claims) -> AppResult<()> {
        if self.clock.now().timestamp() >= claims.exp {
            return Err(AppError::token(format!("{} token has expired", claims.kind.as_str())));
        }
        Ok(())
    }
}

fn hmac_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
    // expiry is compared against the injected clock in `ensure_unexpired`
    validation.validate_exp = false;
    validation.required_spec_claims = ["exp", "sub"].into_iter().map(String::from).collect::<HashSet<_>>();
    validation
}
