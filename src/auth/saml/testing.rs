//! Key material and signed SAML responses for tests.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::{MessageDigest, hash},
    nid::Nid,
    pkey::{PKey, Private, Public},
    rand::rand_bytes,
    rsa::Rsa,
    sign::Signer,
    symm::{encrypt, encrypt_aead},
    x509::{X509, X509Builder, X509NameBuilder},
};

use super::{
    SAML_NS, SAMLP_NS, STATUS_SUCCESS,
    encryption::{BlockCipher, KeyTransport, OaepHash, TYPE_ELEMENT, XENC11_NS, XENC_NS},
    signature::{
        ALG_ENVELOPED, ALG_EXC_C14N, DSIG_NS, KeyFamily, SignatureMethod,
    },
    xml::{C14nMethod, Document, canonicalize},
};
use crate::config::{HashAlgorithm, NAME_ID_FORMAT_EMAIL};

pub const IDP_ENTITY_ID: &str = "https://idp.example.com";
pub const SP_ENTITY_ID: &str = "navigator";
pub const CALLBACK_URL: &str = "https://app.example.com/auth/callback";

/// A private key with a matching self-signed certificate.
pub struct TestKeys {
    pub cert: X509,
    pub cert_pem: String,
    pub key: PKey<Private>,
    pub key_pem: String,
}

impl TestKeys {
    pub fn rsa() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        Self::self_signed(key)
    }

    pub fn ec() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        Self::self_signed(key)
    }

    fn self_signed(key: PKey<Private>) -> Self {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test-idp.example.com").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let cert_pem = String::from_utf8(cert.to_pem().unwrap()).unwrap();
        let key_pem = String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap();
        Self {
            cert,
            cert_pem,
            key,
            key_pem,
        }
    }

    pub fn public_key(&self) -> PKey<Public> {
        self.cert.public_key().unwrap()
    }

    /// Insert an enveloped signature over the element carrying `ID="id"`,
    /// right after that element's `Issuer` child.
    pub fn sign_element(&self, xml: &str, id: &str, hash_alg: HashAlgorithm) -> String {
        let doc = Document::parse(xml).unwrap();
        let target = doc.root().find_by_id(id)[0];
        let exclusive = C14nMethod::Exclusive {
            inclusive_prefixes: Vec::new(),
        };
        let digest = hash(
            hash_alg.message_digest(),
            canonicalize(target, &exclusive, None).as_bytes(),
        )
        .unwrap();

        let method = SignatureMethod::for_key(&self.key, hash_alg);
        let signed_info = format!(
            r##"<ds:SignedInfo xmlns:ds="{DSIG_NS}"><ds:CanonicalizationMethod Algorithm="{ALG_EXC_C14N}"/><ds:SignatureMethod Algorithm="{method}"/><ds:Reference URI="#{id}"><ds:Transforms><ds:Transform Algorithm="{ALG_ENVELOPED}"/><ds:Transform Algorithm="{ALG_EXC_C14N}"/></ds:Transforms><ds:DigestMethod Algorithm="{digest_uri}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
            method = method.uri(),
            digest_uri = hash_alg.digest_uri(),
            digest = STANDARD.encode(&digest[..]),
        );
        let signed_info_doc = Document::parse(&signed_info).unwrap();
        let canonical = canonicalize(signed_info_doc.root(), &exclusive, None);

        let mut signer = Signer::new(hash_alg.message_digest(), &self.key).unwrap();
        signer.update(canonical.as_bytes()).unwrap();
        let mut value = signer.sign_to_vec().unwrap();
        if method.family == KeyFamily::Ecdsa {
            value = self.der_to_raw_ecdsa(&value);
        }

        let cert_body = STANDARD.encode(self.cert.to_der().unwrap());
        let signature = format!(
            r#"<ds:Signature xmlns:ds="{DSIG_NS}">{signed_info}<ds:SignatureValue>{}</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_body}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>"#,
            STANDARD.encode(&value),
        );

        let at = issuer_end(xml, id);
        format!("{}{}{}", &xml[..at], signature, &xml[at..])
    }

    fn der_to_raw_ecdsa(&self, der: &[u8]) -> Vec<u8> {
        let bits = self.key.ec_key().unwrap().group().degree();
        let width = bits.div_ceil(8) as i32;
        let sig = EcdsaSig::from_der(der).unwrap();
        let mut raw = sig.r().to_vec_padded(width).unwrap();
        raw.extend(sig.s().to_vec_padded(width).unwrap());
        raw
    }
}

/// Byte offset just past the `Issuer` end tag of the element with `id`, or
/// past its start tag if it has no issuer.
fn issuer_end(xml: &str, id: &str) -> usize {
    let start = xml.find(&format!("ID=\"{id}\"")).unwrap();
    let mut search = start;
    while let Some(rel) = xml[search..].find("</") {
        let open = search + rel;
        let close = open + xml[open..].find('>').unwrap();
        if xml[open + 2..close].ends_with("Issuer") {
            return close + 1;
        }
        search = close;
    }
    start + xml[start..].find('>').unwrap() + 1
}

/// Flip one bit of the first `SignatureValue` in the document.
pub fn tamper_signature_value(xml: &str) -> String {
    let open = "<ds:SignatureValue>";
    let start = xml.find(open).unwrap() + open.len();
    let end = start + xml[start..].find("</ds:SignatureValue>").unwrap();
    let mut bytes = STANDARD.decode(&xml[start..end]).unwrap();
    bytes[0] ^= 0x01;
    format!("{}{}{}", &xml[..start], STANDARD.encode(&bytes), &xml[end..])
}

/// Encrypt `assertion` for `recipient` and wrap it in a
/// `saml:EncryptedAssertion`, with the `EncryptedKey` inside `KeyInfo`.
pub fn encrypt_assertion(
    assertion: &str,
    recipient: &X509,
    cipher: BlockCipher,
    transport: KeyTransport,
) -> String {
    let mut key = vec![0; cipher.key_len()];
    rand_bytes(&mut key).unwrap();
    let mut iv = vec![0; cipher.iv_len()];
    rand_bytes(&mut iv).unwrap();

    let mut content = iv.clone();
    if cipher.is_gcm() {
        let mut tag = [0; 16];
        let sealed = encrypt_aead(
            cipher.cipher(),
            &key,
            Some(&iv),
            &[],
            assertion.as_bytes(),
            &mut tag,
        )
        .unwrap();
        content.extend(sealed);
        content.extend(tag);
    } else {
        content.extend(encrypt(cipher.cipher(), &key, Some(&iv), assertion.as_bytes()).unwrap());
    }

    let wrapped = transport
        .wrap_key(&recipient.public_key().unwrap(), &key)
        .unwrap();
    let oaep_params = match transport {
        KeyTransport::Rsa15 => String::new(),
        KeyTransport::RsaOaepMgf1p { digest } => {
            format!(r#"<ds:DigestMethod Algorithm="{}"/>"#, digest.digest_uri())
        }
        KeyTransport::RsaOaep { digest, mgf } => format!(
            r#"<ds:DigestMethod Algorithm="{}"/><xenc11:MGF xmlns:xenc11="{XENC11_NS}" Algorithm="{}"/>"#,
            digest.digest_uri(),
            mgf.mgf_uri()
        ),
    };

    format!(
        r#"<saml:EncryptedAssertion><xenc:EncryptedData xmlns:xenc="{XENC_NS}" Type="{TYPE_ELEMENT}"><xenc:EncryptionMethod Algorithm="{}"/><ds:KeyInfo xmlns:ds="{DSIG_NS}"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="{}">{oaep_params}</xenc:EncryptionMethod><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData></saml:EncryptedAssertion>"#,
        cipher.uri(),
        transport.uri(),
        STANDARD.encode(&wrapped),
        STANDARD.encode(&content),
    )
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builder for a SAML Response as an IdP would post it.
#[derive(Debug, Clone)]
pub struct TestResponse {
    pub response_id: String,
    pub assertion_id: String,
    pub issuer: String,
    pub subject: String,
    pub audience: Option<String>,
    pub destination: Option<String>,
    pub recipient: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub attributes: Vec<(String, Vec<String>)>,
    pub status: String,
    pub include_assertion: bool,
    pub sign_assertion: bool,
    pub sign_response: bool,
    pub hash: HashAlgorithm,
    /// When set, the (already signed) assertion is sent encrypted for this
    /// certificate with AES-256-GCM and RSA-OAEP.
    pub encrypt_for: Option<X509>,
}

impl TestResponse {
    pub fn new(subject: &str) -> Self {
        // the wire format carries whole seconds
        let now = Utc::now().trunc_subsecs(0);
        Self {
            response_id: format!("_resp_{}", uuid::Uuid::new_v4().simple()),
            assertion_id: format!("_assert_{}", uuid::Uuid::new_v4().simple()),
            issuer: IDP_ENTITY_ID.to_string(),
            subject: subject.to_string(),
            audience: Some(SP_ENTITY_ID.to_string()),
            destination: Some(CALLBACK_URL.to_string()),
            recipient: Some(CALLBACK_URL.to_string()),
            issued_at: now,
            not_before: now - Duration::minutes(1),
            not_on_or_after: now + Duration::minutes(5),
            attributes: Vec::new(),
            status: STATUS_SUCCESS.to_string(),
            include_assertion: true,
            sign_assertion: true,
            sign_response: false,
            hash: HashAlgorithm::Sha256,
            encrypt_for: None,
        }
    }

    pub fn attribute(mut self, name: &str, values: &[&str]) -> Self {
        self.attributes.push((
            name.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    pub fn to_xml(&self, keys: &TestKeys) -> String {
        let destination = self
            .destination
            .as_ref()
            .map(|d| format!(r#" Destination="{d}""#))
            .unwrap_or_default();
        let assertion = if self.include_assertion {
            self.assertion_xml()
        } else {
            String::new()
        };
        let mut xml = format!(
            r#"<samlp:Response xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{}" Version="2.0" IssueInstant="{}"{destination}><saml:Issuer>{}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status>{assertion}</samlp:Response>"#,
            self.response_id,
            ts(self.issued_at),
            self.issuer,
            self.status,
        );

        if self.include_assertion && self.sign_assertion {
            xml = keys.sign_element(&xml, &self.assertion_id, self.hash);
        }
        if self.include_assertion
            && let Some(recipient) = &self.encrypt_for
        {
            let start = xml.find("<saml:Assertion ").unwrap();
            let close = "</saml:Assertion>";
            let end = xml.find(close).unwrap() + close.len();
            let encrypted = encrypt_assertion(
                &xml[start..end],
                recipient,
                BlockCipher::Aes256Gcm,
                KeyTransport::RsaOaepMgf1p {
                    digest: OaepHash::Sha1,
                },
            );
            xml = format!("{}{}{}", &xml[..start], encrypted, &xml[end..]);
        }
        if self.sign_response {
            xml = keys.sign_element(&xml, &self.response_id, self.hash);
        }
        xml
    }

    pub fn encode(&self, keys: &TestKeys) -> String {
        STANDARD.encode(self.to_xml(keys))
    }

    fn assertion_xml(&self) -> String {
        let recipient = self
            .recipient
            .as_ref()
            .map(|r| format!(r#" Recipient="{r}""#))
            .unwrap_or_default();
        let audience = self
            .audience
            .as_ref()
            .map(|a| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{a}</saml:Audience></saml:AudienceRestriction>"
                )
            })
            .unwrap_or_default();
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|v| {
                        format!(r#"<saml:AttributeValue xsi:type="xs:string">{v}</saml:AttributeValue>"#)
                    })
                    .collect();
                format!(r#"<saml:Attribute Name="{name}">{values}</saml:Attribute>"#)
            })
            .collect();
        let noa = ts(self.not_on_or_after);

        format!(
            r#"<saml:Assertion xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="{id}" Version="2.0" IssueInstant="{issued}"><saml:Issuer>{issuer}</saml:Issuer><saml:Subject><saml:NameID Format="{NAME_ID_FORMAT_EMAIL}">{subject}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData NotOnOrAfter="{noa}"{recipient}/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{nb}" NotOnOrAfter="{noa}">{audience}</saml:Conditions><saml:AuthnStatement AuthnInstant="{issued}" SessionIndex="_session_1"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement><saml:AttributeStatement>{attributes}</saml:AttributeStatement></saml:Assertion>"#,
            id = self.assertion_id,
            issued = ts(self.issued_at),
            issuer = self.issuer,
            subject = self.subject,
            nb = ts(self.not_before),
        )
    }
}
