//! Digest functions.

use aws_lc_rs::digest;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::algorithm::HashAlgorithm;

/// Computes a digest of the input data.
#[must_use]
pub fn hash(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let alg = match algorithm {
        HashAlgorithm::Sha256 => &digest::SHA256,
        HashAlgorithm::Sha384 => &digest::SHA384,
    };

    digest::digest(alg, data).as_ref().to_vec()
}

/// Computes a SHA-256 digest.
///
/// Only used where a protocol mandates it (PKCE `S256`).
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    hash(HashAlgorithm::Sha256, data)
}

/// Computes a SHA-384 digest.
#[must_use]
pub fn sha384(data: &[u8]) -> Vec<u8> {
    hash(HashAlgorithm::Sha384, data)
}

/// Base64url (no padding) of the SHA-384 digest.
///
/// Used to key stored opaque tokens so the raw value never sits in a store.
#[must_use]
pub fn sha384_b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(sha384(data))
}

/// Left-half hash as used by the OIDC `at_hash` and `c_hash` claims.
#[must_use]
pub fn half_hash_b64(algorithm: HashAlgorithm, value: &str) -> String {
    let digest = hash(algorithm, value.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
