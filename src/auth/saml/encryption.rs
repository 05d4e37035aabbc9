//! XML Encryption of assertions (`saml:EncryptedAssertion`).
//!
//! The content key is carried in an `xenc:EncryptedKey`, wrapped with the
//! SP's RSA key (PKCS#1 v1.5 or OAEP). The assertion itself is encrypted
//! with AES in CBC or GCM mode.

use base64::{Engine, engine::general_purpose::STANDARD};
use openssl::{
    error::ErrorStack,
    md::{Md, MdRef},
    pkey::{HasPrivate, HasPublic, Id, PKey, Private},
    pkey_ctx::PkeyCtx,
    rsa::Padding,
    symm::{Cipher, Crypter, Mode, decrypt_aead},
};

use super::{
    SamlError,
    signature::{ALG_SHA256, ALG_SHA512, DSIG_NS},
    xml::{Document, Element},
};

pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
pub const XENC11_NS: &str = "http://www.w3.org/2009/xmlenc11#";
pub const TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";

pub const ALG_AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const ALG_AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const ALG_AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const ALG_AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const ALG_AES192_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes192-gcm";
pub const ALG_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

pub const ALG_RSA_1_5: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const ALG_RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
pub const ALG_RSA_OAEP: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";

pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALG_MGF1_SHA1: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";
pub const ALG_MGF1_SHA256: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha256";
pub const ALG_MGF1_SHA512: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha512";

/// Algorithms listed as `md:EncryptionMethod` in SP metadata, preferred first.
pub const ADVERTISED_ALGORITHMS: [&str; 6] = [
    ALG_AES256_GCM,
    ALG_AES128_GCM,
    ALG_AES256_CBC,
    ALG_AES128_CBC,
    ALG_RSA_OAEP,
    ALG_RSA_OAEP_MGF1P,
];

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_BLOCK_LEN: usize = 16;

/// Content encryption algorithm of an `xenc:EncryptedData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
}

impl BlockCipher {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            ALG_AES128_CBC => Some(BlockCipher::Aes128Cbc),
            ALG_AES192_CBC => Some(BlockCipher::Aes192Cbc),
            ALG_AES256_CBC => Some(BlockCipher::Aes256Cbc),
            ALG_AES128_GCM => Some(BlockCipher::Aes128Gcm),
            ALG_AES192_GCM => Some(BlockCipher::Aes192Gcm),
            ALG_AES256_GCM => Some(BlockCipher::Aes256Gcm),
            _ => None,
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            BlockCipher::Aes128Cbc => ALG_AES128_CBC,
            BlockCipher::Aes192Cbc => ALG_AES192_CBC,
            BlockCipher::Aes256Cbc => ALG_AES256_CBC,
            BlockCipher::Aes128Gcm => ALG_AES128_GCM,
            BlockCipher::Aes192Gcm => ALG_AES192_GCM,
            BlockCipher::Aes256Gcm => ALG_AES256_GCM,
        }
    }

    pub fn cipher(self) -> Cipher {
        match self {
            BlockCipher::Aes128Cbc => Cipher::aes_128_cbc(),
            BlockCipher::Aes192Cbc => Cipher::aes_192_cbc(),
            BlockCipher::Aes256Cbc => Cipher::aes_256_cbc(),
            BlockCipher::Aes128Gcm => Cipher::aes_128_gcm(),
            BlockCipher::Aes192Gcm => Cipher::aes_192_gcm(),
            BlockCipher::Aes256Gcm => Cipher::aes_256_gcm(),
        }
    }

    pub fn is_gcm(self) -> bool {
        matches!(
            self,
            BlockCipher::Aes128Gcm | BlockCipher::Aes192Gcm | BlockCipher::Aes256Gcm
        )
    }

    pub fn key_len(self) -> usize {
        self.cipher().key_len()
    }

    pub fn iv_len(self) -> usize {
        if self.is_gcm() { GCM_IV_LEN } else { CBC_BLOCK_LEN }
    }

    /// Decrypt a `CipherValue`: the IV, then the ciphertext, then (GCM) the tag.
    fn decrypt(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, SamlError> {
        if self.is_gcm() {
            if data.len() < GCM_IV_LEN + GCM_TAG_LEN {
                return Err(failed("GCM cipher value is too short"));
            }
            let (iv, rest) = data.split_at(GCM_IV_LEN);
            let (ciphertext, tag) = rest.split_at(rest.len() - GCM_TAG_LEN);
            return decrypt_aead(self.cipher(), key, Some(iv), &[], ciphertext, tag)
                .map_err(|_| failed("GCM authentication failed"));
        }

        if data.len() <= CBC_BLOCK_LEN || data.len() % CBC_BLOCK_LEN != 0 {
            return Err(failed("CBC cipher value is not a whole number of blocks"));
        }
        let (iv, ciphertext) = data.split_at(CBC_BLOCK_LEN);
        let mut plaintext = cbc_decrypt_unpadded(self.cipher(), key, iv, ciphertext)
            .map_err(|e| failed(format!("CBC decryption failed: {e}")))?;

        // ISO 10126 padding: only the final byte (the pad length) is defined
        let pad = plaintext.last().copied().map(usize::from).unwrap_or(0);
        if pad == 0 || pad > CBC_BLOCK_LEN || pad > plaintext.len() {
            return Err(failed("invalid CBC padding"));
        }
        plaintext.truncate(plaintext.len() - pad);
        Ok(plaintext)
    }
}

fn cbc_decrypt_unpadded(
    cipher: Cipher,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ErrorStack> {
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(iv))?;
    crypter.pad(false);
    let mut out = vec![0; ciphertext.len() + cipher.block_size()];
    let mut written = crypter.update(ciphertext, &mut out)?;
    written += crypter.finalize(&mut out[written..])?;
    out.truncate(written);
    Ok(out)
}

/// Hash used inside RSA-OAEP, for the label digest or MGF1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OaepHash {
    Sha1,
    Sha256,
    Sha512,
}

impl OaepHash {
    fn md(self) -> &'static MdRef {
        match self {
            OaepHash::Sha1 => Md::sha1(),
            OaepHash::Sha256 => Md::sha256(),
            OaepHash::Sha512 => Md::sha512(),
        }
    }

    pub fn digest_uri(self) -> &'static str {
        match self {
            OaepHash::Sha1 => ALG_SHA1,
            OaepHash::Sha256 => ALG_SHA256,
            OaepHash::Sha512 => ALG_SHA512,
        }
    }

    pub fn mgf_uri(self) -> &'static str {
        match self {
            OaepHash::Sha1 => ALG_MGF1_SHA1,
            OaepHash::Sha256 => ALG_MGF1_SHA256,
            OaepHash::Sha512 => ALG_MGF1_SHA512,
        }
    }

    fn from_digest_uri(uri: &str) -> Option<Self> {
        match uri {
            ALG_SHA1 => Some(OaepHash::Sha1),
            ALG_SHA256 => Some(OaepHash::Sha256),
            ALG_SHA512 => Some(OaepHash::Sha512),
            _ => None,
        }
    }

    fn from_mgf_uri(uri: &str) -> Option<Self> {
        match uri {
            ALG_MGF1_SHA1 => Some(OaepHash::Sha1),
            ALG_MGF1_SHA256 => Some(OaepHash::Sha256),
            ALG_MGF1_SHA512 => Some(OaepHash::Sha512),
            _ => None,
        }
    }
}

/// Key transport algorithm of an `xenc:EncryptedKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransport {
    Rsa15,
    /// MGF1 is always SHA-1; the digest defaults to SHA-1.
    RsaOaepMgf1p { digest: OaepHash },
    RsaOaep { digest: OaepHash, mgf: OaepHash },
}

impl KeyTransport {
    /// Parse an `xenc:EncryptionMethod` element.
    pub fn from_method(method: &Element) -> Result<Self, SamlError> {
        let digest = match method.child(DSIG_NS, "DigestMethod") {
            None => OaepHash::Sha1,
            Some(dm) => dm
                .attr("Algorithm")
                .and_then(OaepHash::from_digest_uri)
                .ok_or_else(|| failed("unsupported OAEP digest"))?,
        };

        match method.attr("Algorithm") {
            Some(ALG_RSA_1_5) => Ok(KeyTransport::Rsa15),
            Some(ALG_RSA_OAEP_MGF1P) => Ok(KeyTransport::RsaOaepMgf1p { digest }),
            Some(ALG_RSA_OAEP) => {
                let mgf = match method.child(XENC11_NS, "MGF") {
                    None => OaepHash::Sha1,
                    Some(m) => m
                        .attr("Algorithm")
                        .and_then(OaepHash::from_mgf_uri)
                        .ok_or_else(|| failed("unsupported OAEP mask generation function"))?,
                };
                Ok(KeyTransport::RsaOaep { digest, mgf })
            }
            Some(other) => Err(failed(format!("unsupported key transport {other}"))),
            None => Err(failed("key transport algorithm missing")),
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            KeyTransport::Rsa15 => ALG_RSA_1_5,
            KeyTransport::RsaOaepMgf1p { .. } => ALG_RSA_OAEP_MGF1P,
            KeyTransport::RsaOaep { .. } => ALG_RSA_OAEP,
        }
    }

    /// Set padding and OAEP hashes on a context already initialised for
    /// encryption or decryption.
    pub fn configure<T>(self, ctx: &mut PkeyCtx<T>) -> Result<(), ErrorStack> {
        match self {
            KeyTransport::Rsa15 => ctx.set_rsa_padding(Padding::PKCS1),
            KeyTransport::RsaOaepMgf1p { digest } => {
                ctx.set_rsa_padding(Padding::PKCS1_OAEP)?;
                ctx.set_rsa_oaep_md(digest.md())?;
                ctx.set_rsa_mgf1_md(Md::sha1())
            }
            KeyTransport::RsaOaep { digest, mgf } => {
                ctx.set_rsa_padding(Padding::PKCS1_OAEP)?;
                ctx.set_rsa_oaep_md(digest.md())?;
                ctx.set_rsa_mgf1_md(mgf.md())
            }
        }
    }

    fn unwrap_key<T: HasPrivate>(self, key: &PKey<T>, wrapped: &[u8]) -> Result<Vec<u8>, ErrorStack> {
        let mut ctx = PkeyCtx::new(key)?;
        ctx.decrypt_init()?;
        self.configure(&mut ctx)?;
        let mut out = Vec::new();
        ctx.decrypt_to_vec(wrapped, &mut out)?;
        Ok(out)
    }

    /// Wrap a content key for `recipient`.
    pub fn wrap_key<T: HasPublic>(self, recipient: &PKey<T>, content_key: &[u8]) -> Result<Vec<u8>, ErrorStack> {
        let mut ctx = PkeyCtx::new(recipient)?;
        ctx.encrypt_init()?;
        self.configure(&mut ctx)?;
        let mut out = Vec::new();
        ctx.encrypt_to_vec(content_key, &mut out)?;
        Ok(out)
    }
}

/// Decrypt a `saml:EncryptedAssertion` with the SP key.
///
/// The plaintext is parsed in the namespace context of `encrypted`, the
/// way it would read had it been sent in the clear. Nothing here vouches
/// for the content: anyone holding the SP certificate can encrypt, so the
/// usual signature checks still apply to the result.
pub fn decrypt_assertion(encrypted: &Element, key: &PKey<Private>) -> Result<Document, SamlError> {
    let data = encrypted
        .child(XENC_NS, "EncryptedData")
        .ok_or_else(|| failed("EncryptedAssertion has no EncryptedData"))?;
    if let Some(kind) = data.attr("Type")
        && kind != TYPE_ELEMENT
    {
        return Err(failed(format!("unsupported EncryptedData type {kind}")));
    }

    let algorithm = data
        .child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| failed("content encryption algorithm missing"))?;
    let cipher = BlockCipher::from_uri(algorithm)
        .ok_or_else(|| failed(format!("unsupported content encryption {algorithm}")))?;

    let content_key = content_key(encrypted, data, key, cipher)?;
    let plaintext = cipher.decrypt(&content_key, &cipher_value(data)?)?;
    let xml = String::from_utf8(plaintext)
        .map_err(|_| failed("decrypted assertion is not UTF-8"))?;

    Ok(Document::parse_fragment(&xml, encrypted)?)
}

/// Unwrap the content key from the first `EncryptedKey` addressed to us.
///
/// Keys are looked for in the `EncryptedData`'s `KeyInfo` and then as
/// siblings of it; with several recipients only one will unwrap.
fn content_key(
    encrypted: &Element,
    data: &Element,
    key: &PKey<Private>,
    cipher: BlockCipher,
) -> Result<Vec<u8>, SamlError> {
    if key.id() != Id::RSA {
        return Err(failed("SP key is not RSA"));
    }

    let in_key_info = data
        .child(DSIG_NS, "KeyInfo")
        .into_iter()
        .flat_map(|info| info.children_named(XENC_NS, "EncryptedKey"));
    let siblings = encrypted.children_named(XENC_NS, "EncryptedKey");

    let mut last_error = failed("no EncryptedKey found");
    for encrypted_key in in_key_info.chain(siblings) {
        let attempt = encrypted_key
            .child(XENC_NS, "EncryptionMethod")
            .ok_or_else(|| failed("EncryptedKey has no EncryptionMethod"))
            .and_then(KeyTransport::from_method)
            .and_then(|transport| {
                let wrapped = cipher_value(encrypted_key)?;
                transport
                    .unwrap_key(key, &wrapped)
                    .map_err(|_| failed("content key does not unwrap with the SP key"))
            });
        match attempt {
            Ok(content_key) if content_key.len() == cipher.key_len() => return Ok(content_key),
            Ok(_) => last_error = failed("content key has the wrong length"),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

fn cipher_value(el: &Element) -> Result<Vec<u8>, SamlError> {
    let text = el
        .child(XENC_NS, "CipherData")
        .and_then(|d| d.child(XENC_NS, "CipherValue"))
        .map(Element::text)
        .ok_or_else(|| failed(format!("{} has no CipherValue", el.local)))?;
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| failed(format!("invalid base64 in CipherValue: {e}")))
}

fn failed(msg: impl Into<String>) -> SamlError {
    SamlError::Decryption(msg.into())
}
