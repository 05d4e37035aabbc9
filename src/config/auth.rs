use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Upper bound for access and refresh token lifetimes (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound for exchange code lifetimes.
pub const MAX_CODE_TTL_SECS: u64 = 10 * 60;

/// Session token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// HMAC secret used to sign tokens. When omitted a random secret is
    /// generated at startup, which invalidates all tokens on restart.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// `iss` claim written into and required from every token.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Where token records (used for revocation) are kept.
    #[serde(default)]
    pub store: TokenStoreBackend,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            issuer: default_issuer(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            store: TokenStoreBackend::default(),
        }
    }
}

impl SessionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.signing_secret
            && secret.len() < 32
        {
            return Err(ConfigError::Validation(
                "session.signing_secret must be at least 32 bytes".into(),
            ));
        }
        if self.access_token_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "session.access_token_ttl_secs must be greater than zero".into(),
            ));
        }
        let ttls = [
            ("session.access_token_ttl_secs", self.access_token_ttl_secs),
            ("session.refresh_token_ttl_secs", self.refresh_token_ttl_secs),
        ];
        for (name, ttl) in ttls {
            if ttl > MAX_TOKEN_TTL_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} cannot exceed {MAX_TOKEN_TTL_SECS} seconds"
                )));
            }
        }
        Ok(())
    }
}

/// Backend for issued-token records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStoreBackend {
    /// Persist records in the configured database; survives restarts and
    /// works across nodes.
    #[default]
    Database,
    /// Keep records in process memory (single node only).
    Memory,
}

fn default_issuer() -> String {
    "navigator-sso".to_string()
}

fn default_access_ttl() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_refresh_ttl() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

/// Just-in-time provisioning policy for first-time SSO users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Value stored in `users.provider` for accounts created through SSO.
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Role attached to newly provisioned accounts.
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Refresh first/last/display name from the assertion on every login.
    #[serde(default)]
    pub sync_attributes_on_login: bool,

    /// Write `users.last_login_at` on every successful login.
    #[serde(default)]
    pub record_last_login: bool,

    /// Store the raw asserted attributes in `users.sso_profile`.
    #[serde(default)]
    pub store_sso_profile: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_role: default_role(),
            sync_attributes_on_login: false,
            record_last_login: false,
            store_sso_profile: false,
        }
    }
}

impl ProvisioningConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Validation(
                "provisioning.provider cannot be empty".into(),
            ));
        }
        if self.default_role.trim().is_empty() {
            return Err(ConfigError::Validation(
                "provisioning.default_role cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_provider() -> String {
    "saml".to_string()
}

fn default_role() -> String {
    "member".to_string()
}

/// How tokens reach the browser after a successful callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    #[serde(default)]
    pub mode: HandoffMode,

    /// Frontend path the callback redirects to.
    #[serde(default = "default_frontend_callback_path")]
    pub frontend_callback_path: String,

    /// Lifetime of one-time exchange codes in seconds.
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            mode: HandoffMode::default(),
            frontend_callback_path: default_frontend_callback_path(),
            code_ttl_secs: default_code_ttl(),
        }
    }
}

impl HandoffConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !self.frontend_callback_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "handoff.frontend_callback_path must start with '/'".into(),
            ));
        }
        if self.mode == HandoffMode::ExchangeCode && self.code_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "handoff.code_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.code_ttl_secs > MAX_CODE_TTL_SECS {
            return Err(ConfigError::Validation(format!(
                "handoff.code_ttl_secs cannot exceed {MAX_CODE_TTL_SECS} seconds"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// `?token=…&refreshToken=…` on the frontend callback URL.
    #[default]
    Query,
    /// `?code=…`, redeemed once via `POST /auth/exchange`.
    ExchangeCode,
}

fn default_frontend_callback_path() -> String {
    "/auth/callback".to_string()
}

fn default_code_ttl() -> u64 {
    60
}
