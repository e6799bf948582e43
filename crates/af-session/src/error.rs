//! Session error types.

use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session token does not prove the session.
    ///
    /// Unknown sessions, terminated sessions and wrong tokens all map here so
    /// a caller cannot probe for session ids.
    #[error("Session invalid")]
    InvalidSession,

    /// Storage error.
    #[error("Session storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal session error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Checks if this is an authentication-proof failure.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidSession)
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
