use reqwest::StatusCode;
use serde_json::json;
use url::Url;

use super::{ClientError, ClientResult};
use crate::{auth::SessionToken, models::UserProfile};

/// HTTP calls the client makes against the SSO service.
#[derive(Debug, Clone)]
pub struct AuthApi {
    http_client: reqwest::Client,
    /// Service base URL, including any `server.base_path`
    base_url: String,
}

impl AuthApi {
    pub fn new(base_url: &Url) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &Url, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Entry point that starts an SP-initiated login.
    pub fn login_url(&self) -> ClientResult<Url> {
        Ok(Url::parse(&self.endpoint("/auth/login"))?)
    }

    /// `GET /auth/me`.
    pub async fn me(&self, access_token: &str) -> ClientResult<UserProfile> {
        let response = self
            .http_client
            .get(self.endpoint("/auth/me"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(response.json().await?)
    }

    /// `POST /auth/logout`.
    pub async fn logout(&self, access_token: &str) -> ClientResult<()> {
        let response = self
            .http_client
            .post(self.endpoint("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }

    /// `POST /auth/exchange`: redeem a one-time hand-off code.
    pub async fn exchange(&self, code: &str) -> ClientResult<SessionToken> {
        let response = self
            .http_client
            .post(self.endpoint("/auth/exchange"))
            .json(&json!({ "code": code }))
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(response.json().await?)
    }
}

fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthenticated),
        status => Err(ClientError::Status(status.as_u16())),
    }
}
