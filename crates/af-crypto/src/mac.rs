//! HMAC-SHA384 keys for binding opaque tokens to the record they unlock.

use aws_lc_rs::hmac;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::{CryptoError, CryptoResult};
use crate::random::random_bytes;

/// Minimum key length in bytes (SHA-384 output size).
pub const MIN_MAC_KEY_LEN: usize = 48;

/// HMAC-SHA384 key.
pub struct MacKey {
    key: hmac::Key,
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey").field("key", &"[REDACTED]").finish()
    }
}

impl MacKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key is shorter than
    /// [`MIN_MAC_KEY_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < MIN_MAC_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "mac key must be at least {MIN_MAC_KEY_LEN} bytes"
            )));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA384, bytes),
        })
    }

    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA384, &random_bytes(MIN_MAC_KEY_LEN)),
        }
    }

    /// Signs `data`, returning the raw tag.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        hmac::sign(&self.key, data).as_ref().to_vec()
    }

    /// Signs `data`, returning the tag as base64url without padding.
    #[must_use]
    pub fn sign_b64(&self, data: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(self.sign(data))
    }

    /// Verifies a raw tag in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Verification`] on mismatch.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> CryptoResult<()> {
        hmac::verify(&self.key, data, tag).map_err(|_| CryptoError::Verification)
    }

    /// Verifies a base64url tag in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Verification`] on mismatch or malformed input.
    pub fn verify_b64(&self, data: &[u8], tag_b64: &str) -> CryptoResult<()> {
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| CryptoError::Verification)?;
        self.verify(data, &tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = MacKey::generate();
        let tag = key.sign_b64(b"intent-1.tok");
        assert!(key.verify_b64(b"intent-1.tok", &tag).is_ok());
        assert!(key.verify_b64(b"intent-2.tok", &tag).is_err());
    }

    #[test]
    fn different_keys_do_not_verify() {
        let a = MacKey::generate();
        let b = MacKey::generate();
        let tag = a.sign(b"data");
        assert!(b.verify(b"data", &tag).is_err());
    }

    #[test]
    fn short_key_rejected() {
        assert!(MacKey::from_bytes(&[0u8; 16]).is_err());
        assert!(MacKey::from_bytes(&[7u8; 48]).is_ok());
    }

    #[test]
    fn malformed_tag_rejected() {
        let key = MacKey::generate();
        assert!(key.verify_b64(b"data", "not base64!!").is_err());
    }

    #[test]
    fn debug_redacts() {
        assert!(format!("{:?}", MacKey::generate()).contains("REDACTED"));
    }
}
