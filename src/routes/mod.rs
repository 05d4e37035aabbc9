pub mod auth;
pub mod health;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    config::{AppConfig, HandoffMode},
};

/// Routes relative to `server.base_path`.
///
/// `/auth/exchange` only exists when tokens are handed off by code.
pub fn auth_routes(config: &AppConfig) -> Router<AppState> {
    let router = Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", post(auth::callback))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/metadata", get(auth::metadata))
        .route("/auth/refresh", post(auth::refresh))
        .route("/health", get(health::health_check));

    match config.handoff.mode {
        HandoffMode::Query => router,
        HandoffMode::ExchangeCode => router.route("/auth/exchange", post(auth::exchange)),
    }
}
