//! SAML 2.0 SP-initiated single sign-on with token-based sessions.
//!
//! The server side verifies the IdP's assertion, maps it onto a local user
//! and hands the browser an access/refresh token pair. The [`client`] module
//! restores that session on the application side.

use std::sync::Arc;

use axum::Router;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;

use auth::{
    ExchangeCodeStore, IdentityReconciler, SessionIssuer, TrustConfiguration,
    saml::{AssertionVerifier, RequestGenerator},
};
use config::{AppConfig, ConfigError};
use db::{DbError, DbPool};

/// Errors that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),
}

/// Shared application state.
///
/// Everything here is built once at startup; the trust configuration and
/// the components derived from it are immutable afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DbPool>,
    pub trust: Arc<TrustConfiguration>,
    pub requests: Arc<RequestGenerator>,
    pub verifier: Arc<AssertionVerifier>,
    pub reconciler: IdentityReconciler,
    pub sessions: Arc<SessionIssuer>,
    pub exchange: Arc<ExchangeCodeStore>,
}

impl AppState {
    /// Connect to the configured database, migrate it unless disabled, and
    /// build the state.
    pub async fn new(config: AppConfig) -> Result<Self, StartupError> {
        let db = DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }
        Self::with_db(config, Arc::new(db))
    }

    /// Build the state around an existing, migrated database pool.
    pub fn with_db(config: AppConfig, db: Arc<DbPool>) -> Result<Self, StartupError> {
        let trust = Arc::new(TrustConfiguration::from_config(&config)?);
        let requests = Arc::new(RequestGenerator::new(Arc::clone(&trust))?);
        let verifier = Arc::new(AssertionVerifier::new(Arc::clone(&trust)));
        let reconciler = IdentityReconciler::new(db.users(), config.provisioning.clone());
        let token_store = auth::create_token_store(config.session.store, &db);
        let sessions = Arc::new(SessionIssuer::new(&config.session, token_store));
        let exchange = Arc::new(ExchangeCodeStore::new(config.handoff.code_ttl_secs));

        tracing::info!(
            sp_entity_id = %trust.sp_entity_id(),
            idp_entity_id = %trust.idp_entity_id(),
            callback_url = %trust.callback_url(),
            "SAML trust configuration loaded"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            trust,
            requests,
            verifier,
            reconciler,
            sessions,
            exchange,
        })
    }

    /// Targets for the background cleanup worker.
    pub fn cleanup_targets(&self) -> jobs::CleanupTargets {
        jobs::CleanupTargets {
            tokens: Arc::clone(self.sessions.store()),
            replay: self.verifier.replay_cache().cloned(),
            exchange: Arc::clone(&self.exchange),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let routes = routes::auth_routes(&config);

    let base_path = config.server.base_path();
    let mut app = if base_path.is_empty() {
        Router::new().merge(routes)
    } else {
        Router::new().nest(base_path, routes)
    };

    app = app.layer(axum::middleware::from_fn(middleware::request_id_middleware));

    if let Some(cors) = config.server.cors.layer() {
        app = app.layer(cors);
    }

    app.layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.server.timeout()))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
