//! Crypto error type.

use thiserror::Error;

/// Error type for crypto operations.
///
/// Messages never include key material or plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material has the wrong length or format.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Sealing failed.
    #[error("encryption failed")]
    Encryption,

    /// Opening failed: wrong key, tampered ciphertext, or truncated input.
    #[error("decryption failed")]
    Decryption,

    /// MAC did not match.
    #[error("mac verification failed")]
    Verification,
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
