//! SAML SSO and session routes.
//!
//! - `GET  /auth/login`    - redirect to the IdP with an AuthnRequest
//! - `POST /auth/callback` - Assertion Consumer Service (HTTP-POST binding)
//! - `POST /auth/logout`   - revoke the bearer token's session
//! - `GET  /auth/me`       - identity behind the bearer token
//! - `GET  /auth/metadata` - SP metadata for the IdP administrator
//! - `POST /auth/refresh`  - rotate a token pair
//! - `POST /auth/exchange` - redeem a one-time hand-off code

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    AppState,
    auth::{AuthError, AuthenticatedUser, SessionToken, TokenError},
    config::HandoffMode,
    models::UserProfile,
};

/// Form posted by the IdP to the callback.
#[derive(Debug, Deserialize)]
pub struct CallbackForm {
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: Option<String>,
    /// Echoed back by the IdP; unused since requests carry no state.
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub code: String,
}

/// A 302 to `location`.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Start a login: redirect the browser to the IdP.
///
/// Query parameters are ignored; the redirect always targets the
/// configured IdP entry point.
#[tracing::instrument(name = "auth.login", skip(state))]
pub async fn login(State(state): State<AppState>) -> Result<Response, AuthError> {
    let url = state.requests.login_redirect()?;
    tracing::info!(idp = %state.trust.idp_entity_id(), "Redirecting to IdP for SAML login");
    Ok(found(url.as_str()))
}

/// Assertion Consumer Service.
///
/// Any failure along decode, verify, reconcile and issue is logged with
/// detail and answered with the same generic 500, including bodies that are
/// not a form at all.
#[tracing::instrument(name = "auth.callback", skip(state, form))]
pub async fn callback(
    State(state): State<AppState>,
    form: Result<Form<CallbackForm>, FormRejection>,
) -> Result<Response, AuthError> {
    let Form(form) = form.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Callback body is not a usable form");
        AuthError::AuthenticationFailed
    })?;

    let saml_response = form
        .saml_response
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            tracing::warn!("Callback received without a SAMLResponse");
            AuthError::AuthenticationFailed
        })?;

    let claims = state.verifier.verify(&saml_response)?;
    let user = state.reconciler.reconcile(&claims).await?;
    let session = state.sessions.issue(&user).await.map_err(|e| {
        tracing::error!(error = %e, user_id = %user.id, "Failed to issue session tokens");
        AuthError::AuthenticationFailed
    })?;

    let target = handoff_url(&state, session).map_err(|e| {
        tracing::error!(error = %e, "Failed to build frontend callback URL");
        AuthError::AuthenticationFailed
    })?;

    tracing::info!(
        user_id = %user.id,
        assertion_id = %claims.assertion_id,
        "SAML login succeeded"
    );
    Ok(found(target.as_str()))
}

/// Frontend callback URL carrying either the tokens or a one-time code.
fn handoff_url(state: &AppState, session: SessionToken) -> Result<Url, url::ParseError> {
    let frontend = state.trust.frontend_url().as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!(
        "{frontend}{}",
        state.config.handoff.frontend_callback_path
    ))?;

    match state.config.handoff.mode {
        HandoffMode::Query => {
            url.query_pairs_mut()
                .append_pair("token", &session.access_token)
                .append_pair("refreshToken", &session.refresh_token);
        }
        HandoffMode::ExchangeCode => {
            let code = state.exchange.issue(session);
            url.query_pairs_mut().append_pair("code", &code);
        }
    }
    Ok(url)
}

#[tracing::instrument(name = "auth.logout", skip_all, fields(user_id = %auth.claims.sub))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AuthError> {
    state.sessions.revoke_session(&auth.claims).await?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

#[tracing::instrument(name = "auth.me", skip_all, fields(user_id = %auth.claims.sub))]
pub async fn me(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<UserProfile>, AuthError> {
    let user = state
        .db
        .users()
        .get_by_id(auth.claims.sub)
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?
        .filter(|u| u.is_active)
        .ok_or(AuthError::Unauthenticated)?;
    Ok(Json(user.into()))
}

#[tracing::instrument(name = "auth.metadata", skip(state))]
pub async fn metadata(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        state.requests.service_provider_metadata().to_string(),
    )
        .into_response()
}

#[tracing::instrument(name = "auth.refresh", skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<SessionToken>, AuthError> {
    Ok(Json(state.sessions.refresh(&body.refresh_token).await?))
}

#[tracing::instrument(name = "auth.exchange", skip_all)]
pub async fn exchange(
    State(state): State<AppState>,
    Json(body): Json<ExchangeRequest>,
) -> Result<Json<SessionToken>, AuthError> {
    state
        .exchange
        .redeem(&body.code)
        .map(Json)
        .ok_or_else(|| AuthError::from(TokenError::Invalid))
}
