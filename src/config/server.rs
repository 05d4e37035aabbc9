use std::{net::IpAddr, time::Duration};

use http::{HeaderName, Method};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base path that all auth routes are nested under (e.g., "/api/v1").
    #[serde(default)]
    pub base_path: Option<String>,

    /// Request body size limit in bytes. SAML responses with embedded
    /// certificates are a few tens of kilobytes at most.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// CORS configuration for the browser client.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: None,
            body_limit_bytes: default_body_limit(),
            timeout_secs: default_timeout(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.base_path
            && !path.is_empty()
            && !path.starts_with('/')
        {
            return Err(ConfigError::Validation(format!(
                "server.base_path must start with '/': {path}"
            )));
        }
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Normalized base path without a trailing slash ("" when unset).
    pub fn base_path(&self) -> &str {
        self.base_path
            .as_deref()
            .map(|p| p.trim_end_matches('/'))
            .unwrap_or("")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MB
}

fn default_timeout() -> u64 {
    30
}

/// CORS configuration.
///
/// Only needed when the frontend is served from a different origin than the
/// API and calls `/auth/me`, `/auth/logout` or `/auth/refresh` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Enable CORS handling.
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins. `*` allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed request headers.
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Preflight cache duration in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_headers: default_allowed_headers(),
            max_age_secs: default_max_age(),
        }
    }
}

fn default_allowed_headers() -> Vec<String> {
    vec!["authorization".into(), "content-type".into()]
}

fn default_max_age() -> u64 {
    3600
}

impl CorsConfig {
    /// Build the tower-http layer, or `None` when CORS is disabled.
    pub fn layer(&self) -> Option<CorsLayer> {
        if !self.enabled {
            return None;
        }

        let origins = if self.allowed_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
        };

        let headers: Vec<HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(AllowMethods::list([Method::GET, Method::POST]))
                .allow_headers(AllowHeaders::list(headers))
                .max_age(Duration::from_secs(self.max_age_secs)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_path_normalized() {
        let config = ServerConfig {
            base_path: Some("/api/v1/".into()),
            ..Default::default()
        };
        assert_eq!(config.base_path(), "/api/v1");
        assert_eq!(ServerConfig::default().base_path(), "");
    }

    #[test]
    fn test_base_path_must_be_absolute() {
        let config = ServerConfig {
            base_path: Some("api".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cors_disabled_by_default() {
        assert!(CorsConfig::default().layer().is_none());
        let enabled = CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://web.example.com".into()],
            ..Default::default()
        };
        assert!(enabled.layer().is_some());
    }
}
