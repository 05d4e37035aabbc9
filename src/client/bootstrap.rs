use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use url::Url;

use super::{AuthApi, ClientError, ClientResult, TokenStorage};
use crate::{config::ClientConfig, models::UserProfile};

/// Query parameters the callback redirect may carry.
const TOKEN_PARAM: &str = "token";
const REFRESH_TOKEN_PARAM: &str = "refreshToken";
const CODE_PARAM: &str = "code";

/// Where the client currently is, and how it moves.
pub trait Navigator: Send + Sync {
    fn current_url(&self) -> Url;

    /// Rewrite the current location without loading anything.
    fn replace_url(&self, url: &Url);

    /// Move to another view or a full page.
    fn navigate(&self, target: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Checking,
    Authenticated(UserProfile),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CapturedTokens {
    access_token: String,
    refresh_token: String,
}

/// Restores and tears down the client's session.
pub struct SessionBootstrapper {
    api: AuthApi,
    storage: Arc<dyn TokenStorage>,
    navigator: Arc<dyn Navigator>,
    config: ClientConfig,
    state: RwLock<SessionState>,
}

impl SessionBootstrapper {
    pub fn new(
        api: AuthApi,
        storage: Arc<dyn TokenStorage>,
        navigator: Arc<dyn Navigator>,
        config: ClientConfig,
    ) -> Self {
        Self {
            api,
            storage,
            navigator,
            config,
            state: RwLock::new(SessionState::Unauthenticated),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Run on load: check any stored session and capture callback tokens
    /// from the current URL, then commit the resulting state.
    ///
    /// Tokens captured from the URL win over the outcome of the stored
    /// session check, which may have raced against them.
    #[tracing::instrument(name = "client.bootstrap", skip(self))]
    pub async fn bootstrap(&self) -> SessionState {
        *self.state.write() = SessionState::Checking;

        let (checked, captured) = tokio::join!(self.check_stored_session(), self.capture_callback());

        let state = match (checked, captured) {
            (_, Some(tokens)) => self.resolve(&tokens.access_token).await,
            (Some(profile), None) => SessionState::Authenticated(profile),
            (None, None) => SessionState::Unauthenticated,
        };

        *self.state.write() = state.clone();
        state
    }

    /// Revoke the session server-side where possible, then forget it locally.
    #[tracing::instrument(name = "client.logout", skip(self))]
    pub async fn logout(&self) {
        match self.stored_access_token() {
            Some(token) => {
                if let Err(e) = self.api.logout(&token).await {
                    tracing::warn!(error = %e, "Logout request failed; clearing local session anyway");
                }
            }
            None => tracing::debug!("No stored session to revoke"),
        }

        self.clear_tokens();
        *self.state.write() = SessionState::Unauthenticated;
        self.navigator.navigate(&self.config.entry_path);
    }

    /// Full-page navigation to the service's login endpoint.
    pub fn login_with_idp(&self) -> ClientResult<()> {
        let url = self.api.login_url()?;
        self.navigator.navigate(url.as_str());
        Ok(())
    }

    async fn check_stored_session(&self) -> Option<UserProfile> {
        let token = self.stored_access_token()?;
        match self.who_am_i(&token).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::info!(error = %e, "Stored session rejected");
                self.clear_tokens_if_current(&token);
                None
            }
        }
    }

    async fn resolve(&self, access_token: &str) -> SessionState {
        match self.who_am_i(access_token).await {
            Ok(profile) => SessionState::Authenticated(profile),
            Err(e) => {
                tracing::warn!(error = %e, "Captured session rejected");
                self.clear_tokens_if_current(access_token);
                SessionState::Unauthenticated
            }
        }
    }

    async fn who_am_i(&self, access_token: &str) -> ClientResult<UserProfile> {
        let secs = self.config.whoami_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), self.api.me(access_token))
            .await
            .map_err(|_| ClientError::Timeout(secs))?
    }

    /// Pick tokens (or a hand-off code) off the current URL, persist them,
    /// strip them from the address and move on to the landing view.
    async fn capture_callback(&self) -> Option<CapturedTokens> {
        let url = self.navigator.current_url();
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };

        let tokens = match (param(TOKEN_PARAM), param(REFRESH_TOKEN_PARAM), param(CODE_PARAM)) {
            (Some(access_token), Some(refresh_token), _) => Some(Ok(CapturedTokens {
                access_token,
                refresh_token,
            })),
            (_, _, Some(code)) => Some(self.api.exchange(&code).await.map(|pair| CapturedTokens {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            })),
            _ => None,
        }?;

        self.navigator.replace_url(&strip_handoff_params(&url));

        let tokens = match tokens.and_then(|t| self.persist(&t).map(|()| t)) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to capture session from callback URL");
                return None;
            }
        };

        self.navigator.navigate(&self.config.landing_path);
        Some(tokens)
    }

    fn persist(&self, tokens: &CapturedTokens) -> ClientResult<()> {
        self.storage
            .set(&self.config.access_token_key, &tokens.access_token)?;
        self.storage
            .set(&self.config.refresh_token_key, &tokens.refresh_token)
    }

    fn stored_access_token(&self) -> Option<String> {
        self.storage
            .get(&self.config.access_token_key)
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to read token storage"))
            .ok()
            .flatten()
    }

    /// Clear storage only while it still holds `checked`; a newer session
    /// written in the meantime stays.
    fn clear_tokens_if_current(&self, checked: &str) {
        if self.stored_access_token().as_deref() == Some(checked) {
            self.clear_tokens();
        }
    }

    fn clear_tokens(&self) {
        for key in [&self.config.access_token_key, &self.config.refresh_token_key] {
            if let Err(e) = self.storage.remove(key) {
                tracing::warn!(error = %e, key = %key, "Failed to clear token storage");
            }
        }
    }
}

fn strip_handoff_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != TOKEN_PARAM && k != REFRESH_TOKEN_PARAM && k != CODE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}
