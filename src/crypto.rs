//! AES-128-ECB password wrapping, compatible with MySQL's
//! AES_ENCRYPT/AES_DECRYPT default mode: the user key is XOR-folded
//! into 16 bytes, the payload is PKCS7-padded, and the transport form
//! is `AES:<base64>`.

use crate::error::GateError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes::Aes128;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

type EcbEnc = ecb::Encryptor<Aes128>;
type EcbDec = ecb::Decryptor<Aes128>;

pub const AES_PREFIX: &str = "AES:";

/// Fold an arbitrary-length key into the 16-byte AES key the same way
/// MySQL's AES functions do (cyclic XOR).
fn fold_key(key: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, b) in key.as_bytes().iter().enumerate() {
        out[i % 16] ^= b;
    }
    out
}

/// Encrypt `plain` and return the `AES:<base64>` transport form.
pub fn encrypt_password(plain: &str, key: &str) -> Result<String, GateError> {
    if key.is_empty() {
        return Err(GateError::Invalid(
            "password encrypt key is not set; SET GLOBAL audit_password_encrypt_key first".into(),
        ));
    }
    let folded = fold_key(key);
    let ct = EcbEnc::new(&folded.into()).encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
    Ok(format!("{}{}", AES_PREFIX, BASE64.encode(ct)))
}

/// Unwrap a possibly `AES:`-prefixed password. Anything that is not a
/// well-formed wrapped value — no prefix, no key configured, bad
/// base64, bad padding — is returned unchanged.
pub fn decrypt_password(value: &str, key: &str) -> String {
    let Some(b64) = value.strip_prefix(AES_PREFIX) else {
        return value.to_string();
    };
    if key.is_empty() {
        return value.to_string();
    }
    let Ok(ct) = BASE64.decode(b64) else {
        return value.to_string();
    };
    let folded = fold_key(key);
    match EcbDec::new(&folded.into()).decrypt_padded_vec_mut::<Pkcs7>(&ct) {
        Ok(pt) => String::from_utf8(pt).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}
