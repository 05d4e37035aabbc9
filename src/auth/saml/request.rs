use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{pkey::Id, sign::Signer};
use samael::{
    metadata::EntityDescriptor,
    schema::{AuthnContextClassRef, AuthnContextComparison, RequestedAuthnContext},
    service_provider::ServiceProviderBuilder,
};
use url::Url;

use super::{encryption, signature::SignatureMethod};
use crate::{
    auth::{
        AuthError,
        trust::{TrustConfiguration, certificate_body},
    },
    config::ConfigError,
};

const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// Builds the AuthnRequest redirect that starts a login, and the SP
/// metadata document handed to the IdP administrator.
///
/// Stateless per call: nothing about an issued request is remembered.
pub struct RequestGenerator {
    trust: Arc<TrustConfiguration>,
    idp_metadata: EntityDescriptor,
    sp_metadata: String,
}

impl RequestGenerator {
    pub fn new(trust: Arc<TrustConfiguration>) -> Result<Self, ConfigError> {
        let idp_metadata = build_idp_metadata(&trust)?;
        let sp_metadata = build_sp_metadata(&trust)?;
        Ok(Self {
            trust,
            idp_metadata,
            sp_metadata,
        })
    }

    /// Full IdP URL carrying a deflated, base64 AuthnRequest (HTTP-Redirect
    /// binding), signed with `SigAlg`/`Signature` when configured.
    pub fn login_redirect(&self) -> Result<Url, AuthError> {
        let sp = ServiceProviderBuilder::default()
            .entity_id(self.trust.sp_entity_id().to_string())
            .acs_url(self.trust.callback_url().to_string())
            .idp_metadata(self.idp_metadata.clone())
            .authn_name_id_format(self.trust.name_id_format().to_string())
            .force_authn(self.trust.force_authn())
            .build()
            .map_err(|e| AuthError::Internal(format!("Failed to build ServiceProvider: {e}")))?;

        let mut authn_request = sp
            .make_authentication_request(self.trust.idp_sso_url().as_str())
            .map_err(|e| AuthError::Internal(format!("Failed to create AuthnRequest: {e}")))?;

        if let Some(class_ref) = self.trust.authn_context_class_ref() {
            authn_request.requested_authn_context = Some(RequestedAuthnContext {
                authn_context_class_refs: Some(vec![AuthnContextClassRef {
                    value: Some(class_ref.to_string()),
                }]),
                authn_context_decl_refs: None,
                comparison: Some(AuthnContextComparison::Exact),
            });
        }

        let redirect = authn_request
            .redirect("")
            .map_err(|e| AuthError::Internal(format!("Failed to encode AuthnRequest: {e}")))?
            .ok_or_else(|| AuthError::Internal("AuthnRequest has no destination".to_string()))?;
        let mut url = Url::parse(redirect.as_str())
            .map_err(|e| AuthError::Internal(format!("Invalid redirect URL: {e}")))?;

        if self.trust.sign_authn_requests() {
            self.sign_redirect_url(&mut url)?;
        }

        tracing::debug!(request_id = %authn_request.id, "Issued SAML AuthnRequest");
        Ok(url)
    }

    /// Append `SigAlg` and `Signature` per the HTTP-Redirect binding: the
    /// signature covers the query string exactly as sent.
    fn sign_redirect_url(&self, url: &mut Url) -> Result<(), AuthError> {
        let key = self.trust.sp_private_key();
        let method = SignatureMethod::for_key(key, self.trust.signature_algorithm());

        url.query_pairs_mut().append_pair("SigAlg", method.uri());
        let query = url
            .query()
            .ok_or_else(|| AuthError::Internal("No query string to sign".to_string()))?
            .to_string();

        let mut signer = Signer::new(method.hash.message_digest(), key)
            .map_err(|e| AuthError::Internal(format!("Failed to create signer: {e}")))?;
        signer
            .update(query.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Failed to update signer: {e}")))?;
        let signature = signer
            .sign_to_vec()
            .map_err(|e| AuthError::Internal(format!("Failed to sign: {e}")))?;

        url.query_pairs_mut()
            .append_pair("Signature", &STANDARD.encode(signature));
        Ok(())
    }

    /// SP metadata XML for registration with the IdP.
    pub fn service_provider_metadata(&self) -> &str {
        &self.sp_metadata
    }
}

/// samael needs the IdP described as metadata; build it from the trust
/// configuration rather than fetching it.
fn build_idp_metadata(trust: &TrustConfiguration) -> Result<EntityDescriptor, ConfigError> {
    let cert = certificate_body(trust.idp_certificate())
        .map_err(|e| ConfigError::Trust(format!("saml.idp_certificate: {e}")))?;
    let xml = format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>
        <md:SingleSignOnService Binding="{HTTP_REDIRECT_BINDING}" Location="{}"/>
    </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
        escape_xml(trust.idp_entity_id()),
        cert,
        escape_xml(trust.idp_sso_url().as_str()),
    );

    samael::metadata::de::from_str(&xml)
        .map_err(|e| ConfigError::Trust(format!("Failed to build IdP metadata: {e}")))
}

fn build_sp_metadata(trust: &TrustConfiguration) -> Result<String, ConfigError> {
    let cert = certificate_body(trust.sp_certificate())
        .map_err(|e| ConfigError::Trust(format!("saml.sp_certificate: {e}")))?;
    let key_info = format!(
        r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{cert}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>"#
    );

    // key transport needs RSA; an EC key can only sign
    let encryption = if trust.sp_private_key().id() == Id::RSA {
        let methods: String = encryption::ADVERTISED_ALGORITHMS
            .iter()
            .map(|alg| format!("\n      <md:EncryptionMethod Algorithm=\"{alg}\"/>"))
            .collect();
        format!(
            r#"
    <md:KeyDescriptor use="encryption">
      {key_info}{methods}
    </md:KeyDescriptor>"#
        )
    } else {
        String::new()
    };

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="{authn_signed}" WantAssertionsSigned="{want_signed}" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      {key_info}
    </md:KeyDescriptor>{encryption}
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{HTTP_POST_BINDING}" Location="{acs}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape_xml(trust.sp_entity_id()),
        authn_signed = trust.sign_authn_requests(),
        want_signed = trust.want_assertions_signed(),
        name_id_format = escape_xml(trust.name_id_format()),
        acs = escape_xml(trust.callback_url().as_str()),
    ))
}

fn escape_xml(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}
