//! Configuration module for the SSO service.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax. Secrets such as the SP
//! private key and the IdP certificate are normally sourced this way.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! base_path = "/api/v1"
//!
//! [database]
//! type = "sqlite"
//! path = "navigator.db"
//!
//! [saml]
//! idp_sso_url = "${SAML_IDP_SSO_URL}"
//! idp_entity_id = "${SAML_IDP_ENTITY_ID}"
//! idp_certificate = "${SAML_IDP_CERT}"
//! sp_entity_id = "${SAML_SP_ENTITY_ID}"
//! sp_certificate = "${SAML_SP_CERT}"
//! sp_private_key = "${SAML_SP_PRIVATE_KEY}"
//! app_url = "${APP_URL}"
//! frontend_url = "${FRONTEND_URL}"
//! ```

mod auth;
mod client;
mod database;
mod jobs;
mod observability;
mod saml;
mod server;

use std::path::Path;

pub use auth::*;
pub use client::*;
pub use database::*;
pub use jobs::*;
pub use observability::*;
pub use saml::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration for the SSO service.
///
/// Only `database` and `saml` are mandatory; every other section has
/// defaults suitable for a single-node deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database holding local identities and issued session tokens.
    pub database: DatabaseConfig,

    /// Trust relationship with the Identity Provider.
    pub saml: SamlConfig,

    /// Access/refresh token issuance.
    #[serde(default)]
    pub session: SessionConfig,

    /// Just-in-time account provisioning policy.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// How issued tokens are handed to the browser after the callback.
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Settings shared with the client session bootstrapper.
    #[serde(default)]
    pub client: ClientConfig,

    /// Background maintenance jobs.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let mut config: AppConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    ///
    /// Cryptographic material is parsed later, when the trust configuration
    /// is built; this pass only checks shape.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.saml.validate()?;
        self.session.validate()?;
        self.provisioning.validate()?;
        self.handoff.validate()?;
        self.jobs.validate()?;

        if self.session.refresh_token_ttl_secs <= self.session.access_token_ttl_secs {
            return Err(ConfigError::Validation(
                "session.refresh_token_ttl_secs must be longer than access_token_ttl_secs".into(),
            ));
        }

        Ok(())
    }

    /// Full callback (Assertion Consumer Service) URL.
    ///
    /// Uses `saml.callback_url` when set, otherwise derives it from the
    /// application URL and the API base path.
    pub fn callback_url(&self) -> String {
        if let Some(url) = &self.saml.callback_url {
            return url.clone();
        }
        format!(
            "{}{}/auth/callback",
            self.saml.app_url.trim_end_matches('/'),
            self.server.base_path()
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Invalid SAML trust configuration: {0}")]
    Trust(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&escape_toml_basic(&value));

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

/// PEM values carry newlines; keep them legal inside a basic TOML string.
fn escape_toml_basic(value: &str) -> String {
    value.replace('\r', "").replace('\n', "\\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"
        [database]
        type = "sqlite"
        path = ":memory:"

        [saml]
        idp_sso_url = "https://idp.example.com/sso"
        idp_entity_id = "https://idp.example.com"
        idp_certificate = "CERT"
        sp_entity_id = "navigator"
        sp_certificate = "CERT"
        sp_private_key = "KEY"
        app_url = "https://app.example.com"
        frontend_url = "https://web.example.com"
    "#;

    #[test]
    fn test_minimal_config() {
        let config = AppConfig::from_str(MINIMAL).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.access_token_ttl_secs, 24 * 60 * 60);
        assert_eq!(config.saml.clock_skew_ms, 5000);
        assert!(config.saml.want_assertions_signed);
        assert!(!config.saml.want_response_signed);
        assert!(config.saml.replay_protection);
        assert!(!config.provisioning.sync_attributes_on_login);
        assert_eq!(config.handoff.mode, HandoffMode::Query);
    }

    #[test]
    fn test_callback_url_derived_from_app_url_and_base_path() {
        let toml = format!("[server]\nbase_path = \"/api/v1\"\n{MINIMAL}");
        let config = AppConfig::from_str(&toml).unwrap();
        assert_eq!(
            config.callback_url(),
            "https://app.example.com/api/v1/auth/callback"
        );
    }

    #[test]
    fn test_callback_url_explicit() {
        let toml = MINIMAL.replace(
            "app_url =",
            "callback_url = \"https://app.example.com/sso/acs\"\n        app_url =",
        );
        let config = AppConfig::from_str(&toml).unwrap();
        assert_eq!(config.callback_url(), "https://app.example.com/sso/acs");
    }

    #[test]
    fn test_missing_saml_section_rejected() {
        let result = AppConfig::from_str(
            r#"
            [database]
            type = "sqlite"
            path = ":memory:"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_refresh_ttl_must_exceed_access_ttl() {
        let toml = format!("{MINIMAL}\n[session]\nrefresh_token_ttl_secs = 3600\n");
        let err = AppConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("refresh_token_ttl_secs"));
    }

    #[test]
    fn test_clock_skew_bounded() {
        let toml = MINIMAL.replace(
            "app_url =",
            &format!("clock_skew_ms = {}\n        app_url =", i64::MAX),
        );
        let err = AppConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("saml.clock_skew_ms"));

        let toml = MINIMAL.replace(
            "app_url =",
            &format!("clock_skew_ms = {MAX_CLOCK_SKEW_MS}\n        app_url ="),
        );
        assert!(AppConfig::from_str(&toml).is_ok());
    }

    #[test]
    fn test_token_ttls_bounded() {
        let toml = format!(
            "{MINIMAL}\n[session]\nrefresh_token_ttl_secs = {}\n",
            i64::MAX
        );
        let err = AppConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("session.refresh_token_ttl_secs"));

        let toml = format!(
            "{MINIMAL}\n[session]\naccess_token_ttl_secs = {}\nrefresh_token_ttl_secs = {}\n",
            MAX_TOKEN_TTL_SECS + 1,
            MAX_TOKEN_TTL_SECS + 2
        );
        let err = AppConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("session.access_token_ttl_secs"));
    }

    #[test]
    fn test_code_ttl_bounded() {
        let toml = format!("{MINIMAL}\n[handoff]\nmode = \"exchange_code\"\ncode_ttl_secs = 86400\n");
        let err = AppConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("handoff.code_ttl_secs"));

        let toml = format!("{MINIMAL}\n[handoff]\ncode_ttl_secs = {MAX_CODE_TTL_SECS}\n");
        assert!(AppConfig::from_str(&toml).is_ok());
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_IDP_URL", Some("https://idp.test/sso"), || {
            let result = expand_env_vars("url = \"${TEST_IDP_URL}\"").unwrap();
            assert_eq!(result, "url = \"https://idp.test/sso\"");
        });
    }

    #[test]
    fn test_env_var_multiline_value_is_escaped() {
        temp_env::with_var("TEST_PEM", Some("-----BEGIN-----\r\nAAA\n-----END-----"), || {
            let result = expand_env_vars("cert = \"${TEST_PEM}\"").unwrap();
            assert_eq!(result, "cert = \"-----BEGIN-----\\nAAA\\n-----END-----\"");
        });
    }

    #[test]
    fn test_env_var_missing() {
        temp_env::with_var_unset("TEST_DEFINITELY_MISSING", || {
            let err = expand_env_vars("x = \"${TEST_DEFINITELY_MISSING}\"").unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "TEST_DEFINITELY_MISSING"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("navigator.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.saml.sp_entity_id, "navigator");

        let missing = AppConfig::from_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_, _))));
    }

    #[test]
    fn test_shipped_config_parses() {
        let vars = [
            ("SAML_IDP_SSO_URL", Some("https://idp.example.com/sso")),
            ("SAML_IDP_ENTITY_ID", Some("https://idp.example.com")),
            ("SAML_IDP_CERT", Some("CERT")),
            ("SAML_SP_ENTITY_ID", Some("navigator")),
            ("SAML_SP_CERT", Some("CERT")),
            ("SAML_SP_PRIVATE_KEY", Some("KEY")),
            ("APP_URL", Some("https://app.example.com")),
            ("FRONTEND_URL", Some("https://web.example.com")),
            ("SESSION_SIGNING_SECRET", Some("0123456789abcdef0123456789abcdef")),
        ];
        temp_env::with_vars(vars, || {
            let config = AppConfig::from_str(include_str!("../../navigator.toml")).unwrap();
            assert_eq!(config.saml.idp_entity_id, "https://idp.example.com");
            assert_eq!(config.session.store, TokenStoreBackend::Database);
            assert_eq!(
                config.callback_url(),
                "https://app.example.com/auth/callback"
            );
        });
    }
}
