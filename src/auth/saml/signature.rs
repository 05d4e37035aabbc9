//! Enveloped XML-DSig verification for SAML responses and assertions.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    hash::{MessageDigest, hash},
    pkey::{PKey, Public},
    sign::Verifier,
};
use subtle::ConstantTimeEq;

use super::{
    SamlError,
    xml::{C14nMethod, Element, canonicalize},
};
use crate::config::HashAlgorithm;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ALG_ECDSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512";

pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALG_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

impl HashAlgorithm {
    pub(crate) fn message_digest(self) -> MessageDigest {
        match self {
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Sha512 => MessageDigest::sha512(),
        }
    }

    pub(crate) fn digest_uri(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => ALG_SHA256,
            HashAlgorithm::Sha512 => ALG_SHA512,
        }
    }

    fn from_digest_uri(uri: &str) -> Option<Self> {
        match uri {
            ALG_SHA256 => Some(HashAlgorithm::Sha256),
            ALG_SHA512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

/// Key family of a signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ecdsa,
}

/// `SignatureMethod` identifier broken into key family and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureMethod {
    pub family: KeyFamily,
    pub hash: HashAlgorithm,
}

impl SignatureMethod {
    pub fn from_uri(uri: &str) -> Option<Self> {
        let (family, hash) = match uri {
            ALG_RSA_SHA256 => (KeyFamily::Rsa, HashAlgorithm::Sha256),
            ALG_RSA_SHA512 => (KeyFamily::Rsa, HashAlgorithm::Sha512),
            ALG_ECDSA_SHA256 => (KeyFamily::Ecdsa, HashAlgorithm::Sha256),
            ALG_ECDSA_SHA512 => (KeyFamily::Ecdsa, HashAlgorithm::Sha512),
            _ => return None,
        };
        Some(Self { family, hash })
    }

    pub fn uri(&self) -> &'static str {
        match (self.family, self.hash) {
            (KeyFamily::Rsa, HashAlgorithm::Sha256) => ALG_RSA_SHA256,
            (KeyFamily::Rsa, HashAlgorithm::Sha512) => ALG_RSA_SHA512,
            (KeyFamily::Ecdsa, HashAlgorithm::Sha256) => ALG_ECDSA_SHA256,
            (KeyFamily::Ecdsa, HashAlgorithm::Sha512) => ALG_ECDSA_SHA512,
        }
    }

    /// Method matching the key type, hashing with `hash`.
    pub fn for_key<T>(key: &PKey<T>, hash: HashAlgorithm) -> Self {
        let family = if key.ec_key().is_ok() {
            KeyFamily::Ecdsa
        } else {
            KeyFamily::Rsa
        };
        Self { family, hash }
    }
}

/// Verify the enveloped `ds:Signature` that is a direct child of `signed`.
///
/// `minimum` is the weakest hash accepted in either the digest or the
/// signature method.
pub fn verify_enveloped(
    signed: &Element,
    signature: &Element,
    key: &PKey<Public>,
    minimum: HashAlgorithm,
) -> Result<(), SamlError> {
    let id = signed
        .attr("ID")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("signed element has no ID"))?;

    let signed_info = signature
        .child(DSIG_NS, "SignedInfo")
        .ok_or_else(|| invalid("missing SignedInfo"))?;

    let c14n = signed_info
        .child(DSIG_NS, "CanonicalizationMethod")
        .ok_or_else(|| invalid("missing CanonicalizationMethod"))
        .and_then(c14n_method)?;

    let method_uri = signed_info
        .child(DSIG_NS, "SignatureMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| invalid("missing SignatureMethod"))?;
    let method = SignatureMethod::from_uri(method_uri)
        .ok_or_else(|| invalid(format!("unsupported signature algorithm {method_uri}")))?;
    if method.hash < minimum {
        return Err(invalid("signature hash weaker than configured minimum"));
    }

    let mut references = signed_info.children_named(DSIG_NS, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| invalid("missing Reference"))?;
    if references.next().is_some() {
        return Err(invalid("multiple References"));
    }

    // the reference must point at the element that envelops the signature
    if reference.attr("URI") != Some(format!("#{id}").as_str()) {
        return Err(invalid("Reference URI does not match enclosing element"));
    }

    let (enveloped, transform_c14n) = transforms(reference)?;
    let reference_c14n = transform_c14n.unwrap_or(C14nMethod::Inclusive);
    let exclude = enveloped.then_some(signature);
    let canonical = canonicalize(signed, &reference_c14n, exclude);

    let digest_uri = reference
        .child(DSIG_NS, "DigestMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| invalid("missing DigestMethod"))?;
    let digest_alg = HashAlgorithm::from_digest_uri(digest_uri)
        .ok_or_else(|| invalid(format!("unsupported digest algorithm {digest_uri}")))?;
    if digest_alg < minimum {
        return Err(invalid("digest weaker than configured minimum"));
    }

    let expected = reference
        .child(DSIG_NS, "DigestValue")
        .map(|v| decode_b64(&v.text()))
        .ok_or_else(|| invalid("missing DigestValue"))??;
    let actual = hash(digest_alg.message_digest(), canonical.as_bytes())
        .map_err(|e| invalid(format!("digest failed: {e}")))?;
    if !bool::from(actual[..].ct_eq(&expected[..])) {
        return Err(invalid("digest mismatch"));
    }

    let signature_value = signature
        .child(DSIG_NS, "SignatureValue")
        .map(|v| decode_b64(&v.text()))
        .ok_or_else(|| invalid("missing SignatureValue"))??;
    let signed_info_c14n = canonicalize(signed_info, &c14n, None);

    verify_bytes(key, method, signed_info_c14n.as_bytes(), &signature_value)
}

fn verify_bytes(
    key: &PKey<Public>,
    method: SignatureMethod,
    data: &[u8],
    signature: &[u8],
) -> Result<(), SamlError> {
    let der;
    let signature = match method.family {
        KeyFamily::Rsa => {
            if key.rsa().is_err() {
                return Err(invalid("RSA signature but IdP key is not RSA"));
            }
            signature
        }
        KeyFamily::Ecdsa => {
            if key.ec_key().is_err() {
                return Err(invalid("ECDSA signature but IdP key is not EC"));
            }
            der = raw_ecdsa_to_der(signature)?;
            der.as_slice()
        }
    };

    let mut verifier = Verifier::new(method.hash.message_digest(), key)
        .map_err(|e| invalid(format!("verifier creation failed: {e}")))?;
    verifier
        .update(data)
        .map_err(|e| invalid(format!("verifier update failed: {e}")))?;
    // openssl reports malformed signatures as errors; both outcomes are a bad signature
    match verifier.verify(signature) {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(invalid("signature value does not verify")),
    }
}

/// XML-DSig carries ECDSA signatures as `r || s`; openssl wants DER.
fn raw_ecdsa_to_der(raw: &[u8]) -> Result<Vec<u8>, SamlError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(invalid("malformed ECDSA signature"));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let to_bn = |b: &[u8]| BigNum::from_slice(b).map_err(|e| invalid(e.to_string()));
    EcdsaSig::from_private_components(to_bn(r)?, to_bn(s)?)
        .and_then(|sig| sig.to_der())
        .map_err(|e| invalid(format!("malformed ECDSA signature: {e}")))
}

fn c14n_method(el: &Element) -> Result<C14nMethod, SamlError> {
    match el.attr("Algorithm") {
        Some(ALG_EXC_C14N) => Ok(C14nMethod::Exclusive {
            inclusive_prefixes: inclusive_prefixes(el),
        }),
        Some(ALG_C14N) => Ok(C14nMethod::Inclusive),
        Some(other) => Err(invalid(format!("unsupported canonicalization {other}"))),
        None => Err(invalid("canonicalization algorithm missing")),
    }
}

fn inclusive_prefixes(el: &Element) -> Vec<String> {
    el.child(EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|inc| inc.attr("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Returns whether the enveloped transform is present and the c14n
/// transform, if any. Anything else is refused.
fn transforms(reference: &Element) -> Result<(bool, Option<C14nMethod>), SamlError> {
    let mut enveloped = false;
    let mut c14n = None;

    let Some(list) = reference.child(DSIG_NS, "Transforms") else {
        return Ok((enveloped, c14n));
    };
    for transform in list.children_named(DSIG_NS, "Transform") {
        match transform.attr("Algorithm") {
            Some(ALG_ENVELOPED) => enveloped = true,
            Some(_) if c14n.is_none() => c14n = Some(c14n_method(transform)?),
            Some(other) => return Err(invalid(format!("unsupported transform {other}"))),
            None => return Err(invalid("transform algorithm missing")),
        }
    }
    Ok((enveloped, c14n))
}

fn decode_b64(text: &str) -> Result<Vec<u8>, SamlError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| invalid(format!("invalid base64: {e}")))
}

fn invalid(msg: impl Into<String>) -> SamlError {
    SamlError::InvalidSignature(msg.into())
}
