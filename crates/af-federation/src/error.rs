//! Federation error types.
//!
//! [`IntentError`] is what callers of the intent manager see. [`LdapError`]
//! stays between the manager and the directory adapter; the manager folds it
//! into `InvalidCredentials` or `Unavailable` so directory details never
//! reach the client.

use af_cache::{CacheError, TokenError};
use af_crypto::CryptoError;
use thiserror::Error;

/// Errors returned by [`IdpIntentManager`](crate::IdpIntentManager).
#[derive(Debug, Error)]
pub enum IntentError {
    /// A required argument is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Unknown intent or identity provider.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The intent already succeeded or failed.
    #[error("intent already succeeded or failed")]
    AlreadyTerminal,

    /// The presented intent token does not belong to the intent.
    #[error("invalid intent token")]
    InvalidToken,

    /// The intent did not succeed.
    #[error("intent has not succeeded")]
    NotSucceeded,

    /// The result was already retrieved.
    #[error("intent already retrieved")]
    AlreadyConsumed,

    /// The intent lifetime is over.
    #[error("intent expired")]
    Expired,

    /// The directory rejected the login.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The identity provider could not be reached in time.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// Storage or crypto failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntentError {
    /// Returns `true` if the caller may retry the same call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Returns `true` for terminal conflicts that indicate a replayed callback
    /// or a second retrieval.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyTerminal | Self::AlreadyConsumed)
    }
}

impl From<CacheError> for IntentError {
    fn from(err: CacheError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CryptoError> for IntentError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TokenError> for IntentError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => Self::InvalidToken,
            TokenError::Consumed => Self::AlreadyConsumed,
            TokenError::Expired => Self::Expired,
            TokenError::Backend(e) => e.into(),
        }
    }
}

/// Result type for intent operations.
pub type IntentResult<T> = Result<T, IntentError>;

/// Errors from the LDAP adapter.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-LDAPS connection URL.
    #[error("only ldaps:// connections are allowed")]
    InsecureProtocol,

    /// Connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Service account bind failed.
    #[error("bind error: {0}")]
    Bind(String),

    /// Search failed.
    #[error("search error: {0}")]
    Search(String),

    /// Unknown user or wrong password. The two are not distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Checks if this is a connection-level error.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Bind(_))
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_intent_errors() {
        assert!(matches!(
            IntentError::from(TokenError::Invalid),
            IntentError::InvalidToken
        ));
        assert!(IntentError::from(TokenError::Consumed).is_replay());
        assert!(matches!(
            IntentError::from(TokenError::Expired),
            IntentError::Expired
        ));
        assert!(
            IntentError::from(TokenError::Backend(CacheError::Internal("x".into()))).is_retryable()
        );
    }

    #[test]
    fn only_internal_is_retryable() {
        assert!(!IntentError::Unavailable("ldap".into()).is_retryable());
        assert!(!IntentError::InvalidCredentials.is_retryable());
        assert!(IntentError::AlreadyTerminal.is_replay());
        assert!(!IntentError::NotSucceeded.is_replay());
    }

    #[test]
    fn connection_errors() {
        assert!(LdapError::Connection("refused".into()).is_connection_error());
        assert!(!LdapError::InvalidCredentials.is_connection_error());
        assert!(!LdapError::InsecureProtocol.is_connection_error());
    }
}
