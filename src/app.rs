use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{gate, PolicyEngine, PolicyStore, SqlitePolicyStore};
use crate::config::AccessConfig;
use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::jwt::TokenService;
use crate::mail::{LogMailer, Mailer};
use crate::routes::{auth, health, memberships, permissions, roles, users};
use crate::utils::Clock;
use crate::verification::{SqliteIdentityStore, VerificationTracker};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AccessConfig>,
    pub tokens: Arc<TokenService>,
    pub policy: Arc<PolicyEngine>,
    pub verification: Arc<VerificationTracker>,
    pub mailer: Arc<dyn Mailer>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires the SQLite-backed collaborators; the event bus starts without a listener.
    pub fn new(pool: SqlitePool, config: AccessConfig) -> Self {
        let (event_bus, _) = events::init_event_bus();
        let policy = PolicyEngine::new(Arc::new(SqlitePolicyStore::new(pool.clone())), config.fields.clone());
        let verification = VerificationTracker::new(
            Arc::new(SqliteIdentityStore::new(pool.clone())),
            config.max_verification_attempts,
        );

        Self {
            tokens: Arc::new(TokenService::new(config.jwt.clone())),
            policy: Arc::new(policy),
            verification: Arc::new(verification),
            mailer: Arc::new(LogMailer),
            config: Arc::new(config),
            event_bus,
            pool,
        }
    }

    pub fn with_policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policy = Arc::new(PolicyEngine::new(store, self.config.fields.clone()));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = Arc::new(TokenService::with_clock(self.config.jwt.clone(), clock));
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Builds the application from environment configuration and starts the audit listener.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AccessConfig::from_env()?;

    let (event_bus, event_rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, config).with_event_bus(event_bus);
    Ok(build_router(state))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(Any)
        .allow_headers(Any);

    // everything below here requires a valid session token before any grant lookup
    let protected = Router::new()
        .nest("/user/jwt", users::routes(&state))
        .nest("/app/role", roles::routes(&state))
        .nest("/app/permission", permissions::routes(&state))
        .nest("/app/membership", memberships::routes(&state))
        .layer(from_fn_with_state(state.clone(), gate::authenticate));

    let api = Router::new()
        .route("/health", get(health::health))
        .nest("/user", auth::routes())
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
