//! Algorithm identifiers.
//!
//! Token signatures are restricted to the P-384 / SHA-384 family. SHA-256 is
//! only available as a digest because RFC 7636 (PKCE `S256`) mandates it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for algorithm lookups.
#[derive(Debug, Error)]
pub enum AlgorithmError {
    /// Algorithm is known but not permitted for signing.
    #[error("algorithm '{0}' is not permitted for token signatures")]
    NotPermitted(String),

    /// Unknown algorithm.
    #[error("unknown algorithm: {0}")]
    Unknown(String),
}

/// Digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256, used for PKCE only.
    #[serde(rename = "SHA256")]
    Sha256,

    /// SHA-384.
    #[serde(rename = "SHA384")]
    Sha384,
}

impl HashAlgorithm {
    /// Returns the output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

/// Token signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SignatureAlgorithm {
    /// ECDSA using P-384 curve and SHA-384 hash.
    #[serde(rename = "ES384")]
    #[default]
    Es384,

    /// RSA-PSS with SHA-384.
    #[serde(rename = "PS384")]
    Ps384,

    /// RSA PKCS#1 v1.5 with SHA-384.
    #[serde(rename = "RS384")]
    Rs384,
}

impl SignatureAlgorithm {
    /// Returns the JWA algorithm name.
    #[must_use]
    pub const fn jwa_name(self) -> &'static str {
        match self {
            Self::Es384 => "ES384",
            Self::Ps384 => "PS384",
            Self::Rs384 => "RS384",
        }
    }

    /// Returns the digest used by this signature algorithm.
    #[must_use]
    pub const fn hash_algorithm(self) -> HashAlgorithm {
        HashAlgorithm::Sha384
    }

    /// Returns whether this is an ECDSA algorithm.
    #[must_use]
    pub const fn is_ecdsa(self) -> bool {
        matches!(self, Self::Es384)
    }

    /// Parses a JWA algorithm name.
    ///
    /// # Errors
    ///
    /// Returns [`AlgorithmError::NotPermitted`] for SHA-256 and HMAC based
    /// algorithms and [`AlgorithmError::Unknown`] for anything else.
    pub fn from_jwa(name: &str) -> Result<Self, AlgorithmError> {
        match name {
            "ES384" => Ok(Self::Es384),
            "PS384" => Ok(Self::Ps384),
            "RS384" => Ok(Self::Rs384),
            "ES256" | "RS256" | "PS256" | "HS256" | "HS384" | "HS512" | "none" => {
                Err(AlgorithmError::NotPermitted(name.to_string()))
            }
            _ => Err(AlgorithmError::Unknown(name.to_string())),
        }
    }
}
