//! Cryptographically secure random generation.
//!
//! This module provides secure random generation for:
//! - Opaque token identifiers (authorization codes, device codes, refresh tokens)
//! - Human-typable device user codes
//! - Key material and AEAD nonces

use rand::Rng;
use rand::distr::{Alphanumeric, SampleString};

/// Alphabet for device user codes.
///
/// Consonants only: no vowels (no accidental words) and no look-alike
/// characters such as `0`/`O` or `1`/`I`.
pub const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";

/// Generates a cryptographically secure random byte array.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a random alphanumeric string (a-z, A-Z, 0-9).
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    Alphanumeric.sample_string(&mut rng, len)
}

/// Generates a URL-safe base64-encoded random string.
///
/// Output is roughly 4/3 of `byte_len` characters.
#[must_use]
pub fn random_base64url(byte_len: usize) -> String {
    let bytes = random_bytes(byte_len);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Generates an opaque token identifier with 256 bits of entropy.
#[must_use]
pub fn generate_token_id() -> String {
    random_base64url(32)
}

/// Generates a session identifier.
#[must_use]
pub fn generate_session_id() -> String {
    random_alphanumeric(32)
}

/// Generates a device user code of `len` characters from [`USER_CODE_ALPHABET`].
///
/// `len` characters carry about `4.3 * len` bits; user codes are short-lived
/// and rate limited by the device flow, never a standalone credential.
#[must_use]
pub fn generate_user_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..USER_CODE_ALPHABET.len());
            char::from(USER_CODE_ALPHABET[idx])
        })
        .collect()
}

/// Formats a user code for display, e.g. `WDJBMJHT` becomes `WDJB-MJHT`.
#[must_use]
pub fn format_user_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalizes typed user input: uppercases and strips separators and spaces.
#[must_use]
pub fn normalize_user_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
