//! Cache error types.

use std::fmt;

/// Cache operation errors.
#[derive(Debug)]
pub enum CacheError {
    /// Backend failure.
    Internal(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "internal cache error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Why a single-use token was refused.
#[derive(Debug)]
pub enum TokenError {
    /// Malformed token or MAC mismatch.
    Invalid,
    /// MAC is valid but the token is no longer stored: it was redeemed.
    Consumed,
    /// Token is past its expiry.
    Expired,
    /// Backend failure.
    Backend(CacheError),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid token"),
            Self::Consumed => write!(f, "token already consumed"),
            Self::Expired => write!(f, "token expired"),
            Self::Backend(err) => write!(f, "token store failure: {err}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<CacheError> for TokenError {
    fn from(err: CacheError) -> Self {
        Self::Backend(err)
    }
}
