//! SAML 2.0 Service Provider: AuthnRequest and metadata generation, and
//! verification of the IdP's HTTP-POST Response (plain or with an
//! encrypted assertion).

mod claims;
pub mod encryption;
mod replay;
mod request;
pub mod signature;
#[cfg(test)]
pub(crate) mod testing;
mod verifier;
pub mod xml;

pub use claims::{ClaimName, NormalizedClaims};
pub use replay::ReplayCache;
pub use request::RequestGenerator;
pub use verifier::AssertionVerifier;

pub const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Reasons an inbound SAML Response is refused.
///
/// Every variant is reported to the browser as the same generic failure;
/// the distinction exists for logs and tests.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    #[error("malformed SAML response: {0}")]
    MalformedResponse(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("cannot decrypt assertion: {0}")]
    Decryption(String),

    #[error("assertion has expired")]
    Expired,

    #[error("assertion is not yet valid")]
    NotYetValid,

    #[error("issuer does not match the configured IdP")]
    IssuerMismatch,

    #[error("assertion audience does not include this service provider")]
    AudienceMismatch,

    #[error("response was addressed to a different endpoint")]
    DestinationMismatch,

    #[error("IdP returned status {0}")]
    StatusNotSuccess(String),

    #[error("assertion has already been used")]
    Replayed,
}

impl SamlError {
    /// Stable short name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            SamlError::MalformedResponse(_) => "malformed_response",
            SamlError::InvalidSignature(_) => "invalid_signature",
            SamlError::Decryption(_) => "decryption_failed",
            SamlError::Expired => "expired",
            SamlError::NotYetValid => "not_yet_valid",
            SamlError::IssuerMismatch => "issuer_mismatch",
            SamlError::AudienceMismatch => "audience_mismatch",
            SamlError::DestinationMismatch => "destination_mismatch",
            SamlError::StatusNotSuccess(_) => "status_not_success",
            SamlError::Replayed => "replayed",
        }
    }
}

impl From<xml::XmlError> for SamlError {
    fn from(err: xml::XmlError) -> Self {
        SamlError::MalformedResponse(err.to_string())
    }
}
