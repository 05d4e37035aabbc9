use serde::{Deserialize, Serialize};

use super::ConfigError;

pub const NAME_ID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Largest accepted clock skew (ten minutes).
pub const MAX_CLOCK_SKEW_MS: u64 = 10 * 60 * 1000;

/// Raw SAML trust settings as they appear in the config file.
///
/// These are turned into an immutable `TrustConfiguration` at startup, which
/// is where certificates and keys are actually parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// IdP Single Sign-On service URL (HTTP-Redirect binding).
    pub idp_sso_url: String,

    /// IdP entity identifier; assertions must be issued by it.
    pub idp_entity_id: String,

    /// IdP signing certificate (PEM, with or without armour).
    pub idp_certificate: String,

    /// Service Provider entity ID (our issuer name towards the IdP).
    pub sp_entity_id: String,

    /// SP signing certificate (PEM).
    pub sp_certificate: String,

    /// SP private key (PEM, PKCS#8 or PKCS#1).
    pub sp_private_key: String,

    /// Public origin the SP is deployed at, e.g. `https://app.example.com`.
    pub app_url: String,

    /// Frontend base URL the browser is sent back to after login.
    pub frontend_url: String,

    /// Explicit Assertion Consumer Service URL. Derived from `app_url`
    /// and `server.base_path` when omitted.
    #[serde(default)]
    pub callback_url: Option<String>,

    /// Algorithm used for AuthnRequest signatures.
    #[serde(default)]
    pub signature_algorithm: HashAlgorithm,

    /// Minimum digest algorithm accepted in IdP signatures.
    #[serde(default)]
    pub digest_algorithm: HashAlgorithm,

    /// Accepted clock skew between us and the IdP, in milliseconds.
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: u64,

    /// NameID format requested from the IdP.
    #[serde(default = "default_name_id_format")]
    pub name_id_format: String,

    /// Sign AuthnRequests (HTTP-Redirect `SigAlg`/`Signature`).
    #[serde(default = "default_true")]
    pub sign_authn_requests: bool,

    /// Require the assertion itself to be signed.
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,

    /// Require the enclosing Response to be signed.
    #[serde(default)]
    pub want_response_signed: bool,

    /// Ask the IdP to re-authenticate even with an existing IdP session.
    #[serde(default)]
    pub force_authn: bool,

    /// Requested authentication context class, e.g.
    /// `urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport`.
    /// Omitted from the AuthnRequest when unset.
    #[serde(default)]
    pub authn_context_class_ref: Option<String>,

    /// Reject assertions whose ID has already been consumed.
    #[serde(default = "default_true")]
    pub replay_protection: bool,
}

impl SamlConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("saml.idp_sso_url", &self.idp_sso_url),
            ("saml.idp_entity_id", &self.idp_entity_id),
            ("saml.idp_certificate", &self.idp_certificate),
            ("saml.sp_entity_id", &self.sp_entity_id),
            ("saml.sp_certificate", &self.sp_certificate),
            ("saml.sp_private_key", &self.sp_private_key),
            ("saml.app_url", &self.app_url),
            ("saml.frontend_url", &self.frontend_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} is required")));
            }
        }

        let urls = [
            ("saml.idp_sso_url", Some(&self.idp_sso_url)),
            ("saml.app_url", Some(&self.app_url)),
            ("saml.frontend_url", Some(&self.frontend_url)),
            ("saml.callback_url", self.callback_url.as_ref()),
        ];
        for (name, value) in urls {
            if let Some(value) = value
                && let Err(e) = url::Url::parse(value)
            {
                return Err(ConfigError::Validation(format!(
                    "{name} is not a valid URL: {e}"
                )));
            }
        }

        if self.clock_skew_ms > MAX_CLOCK_SKEW_MS {
            return Err(ConfigError::Validation(format!(
                "saml.clock_skew_ms cannot exceed {MAX_CLOCK_SKEW_MS}"
            )));
        }

        Ok(())
    }
}

/// Hash algorithm used in signatures and digests. SHA-1 is not accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

fn default_clock_skew_ms() -> u64 {
    5000
}

fn default_name_id_format() -> String {
    NAME_ID_FORMAT_EMAIL.to_string()
}

fn default_true() -> bool {
    true
}
