//! Immutable trust relationship between this Service Provider and the IdP.
//!
//! Built once at startup from the raw `[saml]` config section. Every
//! certificate and key is parsed here so that a misconfigured deployment
//! fails before it binds a socket rather than on the first login.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Duration;
use openssl::{
    asn1::Asn1Time,
    pkey::{PKey, Private, Public},
    x509::X509,
};
use url::Url;

use crate::config::{AppConfig, ConfigError, HashAlgorithm};

pub struct TrustConfiguration {
    idp_sso_url: Url,
    idp_entity_id: String,
    idp_certificate: X509,
    idp_public_key: PKey<Public>,
    sp_entity_id: String,
    callback_url: Url,
    frontend_url: Url,
    sp_certificate: X509,
    sp_private_key: PKey<Private>,
    signature_algorithm: HashAlgorithm,
    digest_algorithm: HashAlgorithm,
    clock_skew: Duration,
    name_id_format: String,
    sign_authn_requests: bool,
    want_assertions_signed: bool,
    want_response_signed: bool,
    force_authn: bool,
    authn_context_class_ref: Option<String>,
    replay_protection: bool,
}

impl TrustConfiguration {
    /// Parse and validate the trust material in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let saml = &config.saml;

        let idp_sso_url = parse_url("saml.idp_sso_url", &saml.idp_sso_url)?;
        let app_url = parse_url("saml.app_url", &saml.app_url)?;
        let callback_url = parse_url("callback URL", &config.callback_url())?;
        let frontend_url = parse_url("saml.frontend_url", &saml.frontend_url)?;

        if callback_url.origin() != app_url.origin() {
            return Err(ConfigError::Trust(format!(
                "callback URL {} is not on the application origin {}",
                callback_url,
                app_url.origin().ascii_serialization()
            )));
        }

        let idp_entity_id = non_empty("saml.idp_entity_id", &saml.idp_entity_id)?;
        let sp_entity_id = non_empty("saml.sp_entity_id", &saml.sp_entity_id)?;

        let idp_certificate = parse_certificate("saml.idp_certificate", &saml.idp_certificate)?;
        let idp_public_key = idp_certificate
            .public_key()
            .map_err(|e| ConfigError::Trust(format!("saml.idp_certificate: {e}")))?;
        warn_if_expired("IdP", &idp_certificate);

        let sp_certificate = parse_certificate("saml.sp_certificate", &saml.sp_certificate)?;
        let sp_private_key = parse_private_key(&saml.sp_private_key)?;
        let sp_public_key = sp_certificate
            .public_key()
            .map_err(|e| ConfigError::Trust(format!("saml.sp_certificate: {e}")))?;
        if !sp_public_key.public_eq(&sp_private_key) {
            return Err(ConfigError::Trust(
                "saml.sp_private_key does not match saml.sp_certificate".into(),
            ));
        }
        warn_if_expired("SP", &sp_certificate);

        let clock_skew = Duration::milliseconds(i64::try_from(saml.clock_skew_ms).map_err(
            |_| ConfigError::Trust("saml.clock_skew_ms is out of range".into()),
        )?);

        Ok(Self {
            idp_sso_url,
            idp_entity_id,
            idp_certificate,
            idp_public_key,
            sp_entity_id,
            callback_url,
            frontend_url,
            sp_certificate,
            sp_private_key,
            signature_algorithm: saml.signature_algorithm,
            digest_algorithm: saml.digest_algorithm,
            clock_skew,
            name_id_format: saml.name_id_format.clone(),
            sign_authn_requests: saml.sign_authn_requests,
            want_assertions_signed: saml.want_assertions_signed,
            want_response_signed: saml.want_response_signed,
            force_authn: saml.force_authn,
            authn_context_class_ref: saml.authn_context_class_ref.clone(),
            replay_protection: saml.replay_protection,
        })
    }

    pub fn idp_sso_url(&self) -> &Url {
        &self.idp_sso_url
    }

    pub fn idp_entity_id(&self) -> &str {
        &self.idp_entity_id
    }

    pub fn idp_certificate(&self) -> &X509 {
        &self.idp_certificate
    }

    /// Key that every IdP signature must verify against.
    pub fn idp_public_key(&self) -> &PKey<Public> {
        &self.idp_public_key
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_entity_id
    }

    /// Assertion Consumer Service URL (HTTP-POST binding).
    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    pub fn frontend_url(&self) -> &Url {
        &self.frontend_url
    }

    pub fn sp_certificate(&self) -> &X509 {
        &self.sp_certificate
    }

    pub fn sp_private_key(&self) -> &PKey<Private> {
        &self.sp_private_key
    }

    pub fn signature_algorithm(&self) -> HashAlgorithm {
        self.signature_algorithm
    }

    pub fn digest_algorithm(&self) -> HashAlgorithm {
        self.digest_algorithm
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    pub fn name_id_format(&self) -> &str {
        &self.name_id_format
    }

    pub fn sign_authn_requests(&self) -> bool {
        self.sign_authn_requests
    }

    pub fn want_assertions_signed(&self) -> bool {
        self.want_assertions_signed
    }

    pub fn want_response_signed(&self) -> bool {
        self.want_response_signed
    }

    pub fn force_authn(&self) -> bool {
        self.force_authn
    }

    pub fn authn_context_class_ref(&self) -> Option<&str> {
        self.authn_context_class_ref.as_deref()
    }

    pub fn replay_protection(&self) -> bool {
        self.replay_protection
    }
}

impl fmt::Debug for TrustConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustConfiguration")
            .field("idp_sso_url", &self.idp_sso_url.as_str())
            .field("idp_entity_id", &self.idp_entity_id)
            .field("sp_entity_id", &self.sp_entity_id)
            .field("callback_url", &self.callback_url.as_str())
            .field("sp_private_key", &"<redacted>")
            .field("clock_skew_ms", &self.clock_skew.num_milliseconds())
            .finish_non_exhaustive()
    }
}

/// Base64 DER body of a certificate, as embedded in `ds:X509Certificate`.
pub fn certificate_body(cert: &X509) -> Result<String, openssl::error::ErrorStack> {
    Ok(STANDARD.encode(cert.to_der()?))
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|e| ConfigError::Trust(format!("{name} is not a valid URL: {e}")))
}

fn non_empty(name: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Trust(format!("{name} is required")));
    }
    Ok(value.to_string())
}

/// Accept PEM with armour, PEM with escaped newlines (common in env vars),
/// or a bare base64 body.
fn normalize_pem(raw: &str, label: &str) -> String {
    let unescaped = raw.replace("\\n", "\n");
    let trimmed = unescaped.trim();
    if trimmed.contains("-----BEGIN") {
        return trimmed.to_string();
    }

    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

fn parse_certificate(name: &str, raw: &str) -> Result<X509, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Trust(format!("{name} is required")));
    }
    X509::from_pem(normalize_pem(raw, "CERTIFICATE").as_bytes())
        .map_err(|e| ConfigError::Trust(format!("{name} is not a valid X.509 certificate: {e}")))
}

fn parse_private_key(raw: &str) -> Result<PKey<Private>, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Trust("saml.sp_private_key is required".into()));
    }
    // PKCS#8 and PKCS#1 PEM are both handled by private_key_from_pem
    PKey::private_key_from_pem(normalize_pem(raw, "PRIVATE KEY").as_bytes()).map_err(|e| {
        ConfigError::Trust(format!(
            "Failed to parse saml.sp_private_key (expected PEM format): {e}"
        ))
    })
}

fn warn_if_expired(which: &str, cert: &X509) {
    let expired = Asn1Time::days_from_now(0)
        .and_then(|now| cert.not_after().compare(&now))
        .map(|ord| ord.is_lt())
        .unwrap_or(false);
    if expired {
        tracing::warn!(certificate = which, "Configured certificate has expired");
    }
}
