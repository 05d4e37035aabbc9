use std::{collections::BTreeMap, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};

use super::{
    NormalizedClaims, ReplayCache, SAML_NS, SAMLP_NS, STATUS_SUCCESS, SamlError,
    encryption::decrypt_assertion,
    signature::{DSIG_NS, verify_enveloped},
    xml::{Document, Element},
};
use crate::auth::trust::TrustConfiguration;

/// Replay entries for assertions that carry no expiry are kept this long.
const DEFAULT_REPLAY_WINDOW_MINS: i64 = 10;

/// Verifies IdP Responses posted to the callback endpoint.
///
/// Built once at startup and shared; holds no per-request state apart from
/// the replay cache.
pub struct AssertionVerifier {
    trust: Arc<TrustConfiguration>,
    replay: Option<Arc<ReplayCache>>,
}

impl AssertionVerifier {
    pub fn new(trust: Arc<TrustConfiguration>) -> Self {
        let replay = trust
            .replay_protection()
            .then(|| Arc::new(ReplayCache::new()));
        Self { trust, replay }
    }

    /// Cache of consumed assertion IDs, when replay protection is on.
    pub fn replay_cache(&self) -> Option<&Arc<ReplayCache>> {
        self.replay.as_ref()
    }

    /// Verify a base64 `SAMLResponse` form value against the trust configuration.
    pub fn verify(&self, saml_response: &str) -> Result<NormalizedClaims, SamlError> {
        self.verify_at(saml_response, Utc::now())
    }

    /// As [`verify`](Self::verify), evaluating time conditions at `now`.
    pub fn verify_at(
        &self,
        saml_response: &str,
        now: DateTime<Utc>,
    ) -> Result<NormalizedClaims, SamlError> {
        let xml = decode(saml_response)?;
        let doc = Document::parse(&xml)?;
        let response = doc.root();

        if !response.is(SAMLP_NS, "Response") {
            return Err(malformed("root element is not samlp:Response"));
        }

        let decrypted;
        let assertion = match single_assertion(response)? {
            Carried::Plain(assertion) => assertion,
            Carried::Encrypted(encrypted) => {
                decrypted = decrypt_assertion(encrypted, self.trust.sp_private_key())?;
                decrypted_assertion(&decrypted)?
            }
        };

        // Nothing inside the assertion is read until its signatures check out
        self.verify_signatures(response, assertion)?;

        self.check_issuer(response, assertion)?;
        let not_on_or_after = self.check_timing(assertion, now)?;
        self.check_audience(assertion)?;
        self.check_destination(response, assertion)?;

        let claims = extract_claims(assertion, not_on_or_after)?;

        if let Some(replay) = &self.replay {
            let expiry = not_on_or_after
                .unwrap_or_else(|| now + Duration::minutes(DEFAULT_REPLAY_WINDOW_MINS));
            let keep_until = expiry + self.trust.clock_skew();
            if !replay.check_and_insert(&claims.assertion_id, keep_until, now) {
                return Err(SamlError::Replayed);
            }
        }

        tracing::debug!(
            assertion_id = %claims.assertion_id,
            subject = %claims.subject,
            "SAML assertion verified"
        );
        Ok(claims)
    }

    fn verify_signatures(&self, response: &Element, assertion: &Element) -> Result<(), SamlError> {
        let dups = response.duplicate_ids();
        if !dups.is_empty() {
            return Err(SamlError::InvalidSignature(format!(
                "duplicate ID attributes: {}",
                dups.join(", ")
            )));
        }

        let key = self.trust.idp_public_key();
        let minimum = self.trust.digest_algorithm();

        let response_sig = response.child(DSIG_NS, "Signature");
        let assertion_sig = assertion.child(DSIG_NS, "Signature");

        if response_sig.is_none() && assertion_sig.is_none() {
            return Err(SamlError::InvalidSignature("response is not signed".into()));
        }
        if self.trust.want_response_signed() && response_sig.is_none() {
            return Err(SamlError::InvalidSignature("response signature required".into()));
        }
        if self.trust.want_assertions_signed() && assertion_sig.is_none() {
            return Err(SamlError::InvalidSignature("assertion signature required".into()));
        }

        // Every signature that is present must be valid, required or not
        if let Some(sig) = response_sig {
            verify_enveloped(response, sig, key, minimum)?;
        }
        if let Some(sig) = assertion_sig {
            verify_enveloped(assertion, sig, key, minimum)?;
        }
        Ok(())
    }

    fn check_issuer(&self, response: &Element, assertion: &Element) -> Result<(), SamlError> {
        let expected = self.trust.idp_entity_id();
        let assertion_issuer = assertion
            .child(SAML_NS, "Issuer")
            .map(|i| i.text())
            .ok_or_else(|| malformed("assertion has no Issuer"))?;
        if assertion_issuer.trim() != expected {
            return Err(SamlError::IssuerMismatch);
        }
        if let Some(issuer) = response.child(SAML_NS, "Issuer")
            && issuer.text().trim() != expected
        {
            return Err(SamlError::IssuerMismatch);
        }
        Ok(())
    }

    /// Returns the earliest `NotOnOrAfter` found, if any.
    fn check_timing(
        &self,
        assertion: &Element,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SamlError> {
        let skew = self.trust.clock_skew();
        let mut not_before = Vec::new();
        let mut not_on_or_after = Vec::new();

        if let Some(conditions) = assertion.child(SAML_NS, "Conditions") {
            if let Some(v) = conditions.attr("NotBefore") {
                not_before.push(parse_instant(v)?);
            }
            if let Some(v) = conditions.attr("NotOnOrAfter") {
                not_on_or_after.push(parse_instant(v)?);
            }
        }
        for data in bearer_confirmation_data(assertion) {
            if let Some(v) = data.attr("NotBefore") {
                not_before.push(parse_instant(v)?);
            }
            if let Some(v) = data.attr("NotOnOrAfter") {
                not_on_or_after.push(parse_instant(v)?);
            }
        }

        let earliest_expiry = not_on_or_after.into_iter().min();
        if let Some(expiry) = earliest_expiry
            && expiry < now - skew
        {
            return Err(SamlError::Expired);
        }
        if not_before.into_iter().any(|nb| nb > now + skew) {
            return Err(SamlError::NotYetValid);
        }
        Ok(earliest_expiry)
    }

    fn check_audience(&self, assertion: &Element) -> Result<(), SamlError> {
        let Some(conditions) = assertion.child(SAML_NS, "Conditions") else {
            return Ok(());
        };
        let sp = self.trust.sp_entity_id();
        // each restriction present must name us
        for restriction in conditions.children_named(SAML_NS, "AudienceRestriction") {
            let listed = restriction
                .children_named(SAML_NS, "Audience")
                .any(|a| a.text().trim() == sp);
            if !listed {
                return Err(SamlError::AudienceMismatch);
            }
        }
        Ok(())
    }

    fn check_destination(&self, response: &Element, assertion: &Element) -> Result<(), SamlError> {
        let callback = self.trust.callback_url().as_str();
        if let Some(destination) = response.attr("Destination")
            && !same_url(destination, callback)
        {
            return Err(SamlError::DestinationMismatch);
        }
        for data in bearer_confirmation_data(assertion) {
            if let Some(recipient) = data.attr("Recipient")
                && !same_url(recipient, callback)
            {
                return Err(SamlError::DestinationMismatch);
            }
        }
        Ok(())
    }
}

fn decode(saml_response: &str) -> Result<String, SamlError> {
    let compact: String = saml_response
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(malformed("empty SAMLResponse"));
    }
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| malformed(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| malformed(format!("invalid UTF-8: {e}")))
}

/// How the response carries its assertion.
enum Carried<'a> {
    Plain(&'a Element),
    Encrypted(&'a Element),
}

fn is_assertion(el: &Element) -> bool {
    el.is(SAML_NS, "Assertion") || el.is(SAML_NS, "EncryptedAssertion")
}

/// The one assertion, plain or encrypted, carried directly by the response.
///
/// Assertions nested anywhere else are refused so that a signed assertion
/// cannot be wrapped next to an unsigned one.
fn single_assertion(response: &Element) -> Result<Carried<'_>, SamlError> {
    let status = response
        .child(SAMLP_NS, "Status")
        .and_then(|s| s.child(SAMLP_NS, "StatusCode"))
        .and_then(|c| c.attr("Value"));
    if let Some(code) = status
        && code != STATUS_SUCCESS
    {
        return Err(SamlError::StatusNotSuccess(code.to_string()));
    }

    let total = response
        .descendants()
        .into_iter()
        .filter(|e| is_assertion(e))
        .count();
    let mut direct = response.child_elements().filter(|e| is_assertion(e));
    match (direct.next(), direct.next(), total) {
        (Some(el), None, 1) if el.local == "EncryptedAssertion" => Ok(Carried::Encrypted(el)),
        (Some(el), None, 1) => Ok(Carried::Plain(el)),
        (None, _, 0) => Err(malformed("response contains no assertion")),
        _ => Err(malformed("response must contain exactly one assertion")),
    }
}

/// The decrypted plaintext must be exactly one assertion, with no further
/// assertions inside it and no repeated IDs.
fn decrypted_assertion(doc: &Document) -> Result<&Element, SamlError> {
    let assertion = doc.root();
    if !assertion.is(SAML_NS, "Assertion") {
        return Err(malformed("EncryptedAssertion does not contain an assertion"));
    }
    if assertion.descendants().into_iter().filter(|e| is_assertion(e)).count() != 1 {
        return Err(malformed("response must contain exactly one assertion"));
    }
    let dups = assertion.duplicate_ids();
    if !dups.is_empty() {
        return Err(SamlError::InvalidSignature(format!(
            "duplicate ID attributes: {}",
            dups.join(", ")
        )));
    }
    tracing::debug!("Decrypted EncryptedAssertion");
    Ok(assertion)
}

fn bearer_confirmation_data(assertion: &Element) -> Vec<&Element> {
    assertion
        .child(SAML_NS, "Subject")
        .map(|subject| {
            subject
                .children_named(SAML_NS, "SubjectConfirmation")
                .filter(|c| c.attr("Method") == Some("urn:oasis:names:tc:SAML:2.0:cm:bearer"))
                .filter_map(|c| c.child(SAML_NS, "SubjectConfirmationData"))
                .collect()
        })
        .unwrap_or_default()
}

fn extract_claims(
    assertion: &Element,
    not_on_or_after: Option<DateTime<Utc>>,
) -> Result<NormalizedClaims, SamlError> {
    let assertion_id = assertion
        .attr("ID")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("assertion has no ID"))?
        .to_string();

    let subject = assertion
        .child(SAML_NS, "Subject")
        .and_then(|s| s.child(SAML_NS, "NameID"))
        .map(|n| n.text().trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed("assertion has no subject NameID"))?;

    let session_index = assertion
        .child(SAML_NS, "AuthnStatement")
        .and_then(|s| s.attr("SessionIndex"))
        .map(str::to_string);

    let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for statement in assertion.children_named(SAML_NS, "AttributeStatement") {
        for attr in statement.children_named(SAML_NS, "Attribute") {
            let Some(name) = attr.attr("Name") else {
                continue;
            };
            let values = attr
                .children_named(SAML_NS, "AttributeValue")
                .map(|v| v.text());
            attributes.entry(name.to_string()).or_default().extend(values);
        }
    }

    Ok(NormalizedClaims::from_attributes(
        subject,
        assertion_id,
        session_index,
        not_on_or_after,
        attributes,
    ))
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, SamlError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| malformed(format!("invalid timestamp '{value}': {e}")))
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches('/') == b.trim().trim_end_matches('/')
}

fn malformed(msg: impl Into<String>) -> SamlError {
    SamlError::MalformedResponse(msg.into())
}
