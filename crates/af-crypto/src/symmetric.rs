//! AES-256-GCM encryption for provider credentials at rest.
//!
//! Ciphertext layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::{CryptoError, CryptoResult};
use crate::random::random_bytes;

/// AES-256 key length in bytes.
pub const AES_KEY_LEN: usize = 32;

/// Symmetric key for sealing and opening short secrets.
pub struct EncryptionKey {
    key: LessSafeKey,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl EncryptionKey {
    /// Creates a key from 32 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "aes-256 key must be {AES_KEY_LEN} bytes"
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| CryptoError::InvalidKey("rejected by aead".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Generates a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the backend rejects the key.
    pub fn generate() -> CryptoResult<Self> {
        Self::from_bytes(&random_bytes(AES_KEY_LEN))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if sealing fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = random_bytes(NONCE_LEN)
            .try_into()
            .map_err(|_| CryptoError::Encryption)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Decrypts output of [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decryption`] on tampering, truncation or a
    /// wrong key.
    pub fn decrypt(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Decryption);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Decryption)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decryption)?;
        Ok(plaintext.to_vec())
    }

    /// Encrypts a string and returns standard base64.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if sealing fails.
    pub fn encrypt_string(&self, plaintext: &str) -> CryptoResult<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Decrypts output of [`Self::encrypt_string`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Decryption`] on malformed input or a failed open.
    pub fn decrypt_string(&self, sealed_b64: &str) -> CryptoResult<String> {
        let sealed = STANDARD
            .decode(sealed_b64)
            .map_err(|_| CryptoError::Decryption)?;
        let plaintext = self.decrypt(&sealed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
    }
}
