//! # af-crypto
//!
//! Cryptographic primitives for the authflow identity core using aws-lc-rs.
//!
//! - Token signatures are restricted to the SHA-384 family.
//! - SHA-256 exists only for PKCE `S256`.
//! - Opaque tokens are bound to their record with HMAC-SHA384.
//! - Provider credentials are sealed at rest with AES-256-GCM.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod algorithm;
pub mod error;
pub mod hash;
pub mod mac;
pub mod random;
pub mod symmetric;

pub use algorithm::{HashAlgorithm, SignatureAlgorithm};
pub use error::{CryptoError, CryptoResult};
pub use hash::{half_hash_b64, sha256, sha384, sha384_b64};
pub use mac::MacKey;
pub use symmetric::EncryptionKey;
