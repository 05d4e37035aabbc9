use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::{reconcile::ReconcileError, saml::SamlError, tokens::TokenError};

/// The only body a failed handshake ever returns.
pub const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// HTTP-facing authentication error.
///
/// Handshake failures of every kind collapse into `AuthenticationFailed`;
/// the detail is logged where the error is raised, never returned.
#[derive(Debug)]
pub enum AuthError {
    /// No, invalid, expired or revoked bearer token
    Unauthenticated,

    /// The SAML handshake failed (verification, reconciliation or issuance)
    AuthenticationFailed,

    /// Internal error outside the handshake
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string()),
            AuthError::AuthenticationFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                AUTHENTICATION_FAILED.to_string(),
            ),
            AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unauthenticated => write!(f, "Unauthenticated"),
            AuthError::AuthenticationFailed => write!(f, "{AUTHENTICATION_FAILED}"),
            AuthError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<SamlError> for AuthError {
    fn from(err: SamlError) -> Self {
        tracing::warn!(error = %err, kind = err.kind(), "SAML response rejected");
        AuthError::AuthenticationFailed
    }
}

impl From<ReconcileError> for AuthError {
    fn from(err: ReconcileError) -> Self {
        tracing::warn!(error = %err, "Identity reconciliation failed");
        AuthError::AuthenticationFailed
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Store(e) => {
                tracing::error!(error = %e, "Token store failure");
                AuthError::Internal(e.to_string())
            }
            TokenError::Signing(e) => {
                tracing::error!(error = %e, "Token signing failure");
                AuthError::Internal(e)
            }
            other => {
                tracing::debug!(error = %other, "Bearer token rejected");
                AuthError::Unauthenticated
            }
        }
    }
}
