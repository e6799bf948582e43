//! OIDC protocol error types.
//!
//! Implements OAuth 2.0 and `OpenID` Connect error responses as defined in:
//! - RFC 6749 (OAuth 2.0)
//! - RFC 8628 (Device Authorization Grant)
//! - RFC 8693 (Token Exchange)
//! - `OpenID` Connect Core 1.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OIDC protocol errors.
#[derive(Debug, Error)]
pub enum OidcError {
    /// Invalid request parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Unknown client or client not usable for this request.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Redirect URI is not registered for the client.
    #[error("invalid_request: redirect_uri is not registered for this client")]
    InvalidRedirect,

    /// Invalid or expired authorization grant.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Client is not authorized for this grant or response type.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// Invalid scope.
    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    /// Unknown auth request, device authorization or user code.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The artifact was already consumed.
    #[error("{0} already consumed")]
    AlreadyConsumed(&'static str),

    /// The device authorization was already approved or denied.
    #[error("device authorization already decided")]
    AlreadyDecided,

    /// The record or artifact is past its expiry.
    #[error("{0} expired")]
    Expired(&'static str),

    /// Session token does not prove the session.
    #[error("session invalid")]
    InvalidSession,

    /// Presented token is invalid, expired or unknown.
    #[error("invalid_token: {0}")]
    InvalidToken(String),

    /// Caller lacks a permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Access denied by resource owner.
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// Token type not supported for the given position.
    #[error("unsupported_token_type: {0}")]
    UnsupportedTokenType(String),

    /// Requested audience cannot be resolved.
    #[error("invalid_target: {0}")]
    InvalidTarget(String),

    /// Feature is disabled for this instance.
    #[error("{0} is disabled for this instance")]
    FeatureDisabled(&'static str),

    /// Token signing error.
    #[error("token signing failed: {0}")]
    TokenSigning(String),

    /// Internal error (storage or crypto).
    #[error("internal error: {0}")]
    Internal(String),
}

impl OidcError {
    /// Returns the OAuth 2.0 error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidRedirect => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_)
            | Self::NotFound(_)
            | Self::AlreadyConsumed(_)
            | Self::AlreadyDecided
            | Self::InvalidSession => "invalid_grant",
            Self::Expired(_) => "expired_token",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidToken(_) => "invalid_token",
            Self::PermissionDenied(_) | Self::AccessDenied(_) => "access_denied",
            Self::UnsupportedTokenType(_) => "unsupported_token_type",
            Self::InvalidTarget(_) => "invalid_target",
            Self::FeatureDisabled(_) => "unsupported_grant_type",
            Self::TokenSigning(_) | Self::Internal(_) => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidRedirect
            | Self::InvalidGrant(_)
            | Self::InvalidScope(_)
            | Self::AlreadyConsumed(_)
            | Self::AlreadyDecided
            | Self::Expired(_)
            | Self::InvalidSession
            | Self::UnsupportedTokenType(_)
            | Self::InvalidTarget(_)
            | Self::FeatureDisabled(_) => 400,
            Self::InvalidClient(_) | Self::InvalidToken(_) => 401,
            Self::PermissionDenied(_) | Self::AccessDenied(_) | Self::UnauthorizedClient(_) => 403,
            Self::NotFound(_) => 404,
            Self::TokenSigning(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns whether the external layer may retry the call unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Returns whether this error is a terminal-state conflict, i.e. a
    /// possible replay of a single-use artifact.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyConsumed(_) | Self::AlreadyDecided)
    }

    /// Creates an error response for OAuth 2.0/OIDC.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        let description = match self {
            // never echo internals to clients
            Self::TokenSigning(_) | Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(description),
            error_uri: None,
        }
    }
}

impl From<af_cache::CacheError> for OidcError {
    fn from(err: af_cache::CacheError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<af_session::SessionError> for OidcError {
    fn from(err: af_session::SessionError) -> Self {
        match err {
            af_session::SessionError::InvalidSession => Self::InvalidSession,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// OAuth 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,

    /// Human-readable error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// URI with more information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// Result type for OIDC operations.
pub type OidcResult<T> = Result<T, OidcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes() {
        assert_eq!(
            OidcError::UnsupportedTokenType("refresh_token".into()).error_code(),
            "unsupported_token_type"
        );
        assert_eq!(OidcError::InvalidTarget("x".into()).error_code(), "invalid_target");
        assert_eq!(OidcError::Expired("device code").error_code(), "expired_token");
        assert_eq!(OidcError::AlreadyConsumed("code").error_code(), "invalid_grant");
        assert_eq!(
            OidcError::PermissionDenied("x".into()).error_code(),
            "access_denied"
        );
    }

    #[test]
    fn http_statuses() {
        assert_eq!(OidcError::InvalidGrant("code".into()).http_status(), 400);
        assert_eq!(OidcError::InvalidClient("web".into()).http_status(), 401);
        assert_eq!(OidcError::PermissionDenied("x".into()).http_status(), 403);
        assert_eq!(OidcError::NotFound("auth request").http_status(), 404);
        assert_eq!(OidcError::Internal("db".into()).http_status(), 500);
    }

    #[test]
    fn only_internal_is_retryable() {
        assert!(OidcError::Internal("db".into()).is_retryable());
        assert!(!OidcError::AlreadyDecided.is_retryable());
        assert!(!OidcError::NotFound("auth request").is_retryable());
    }

    #[test]
    fn replay_classification() {
        assert!(OidcError::AlreadyConsumed("auth request").is_replay());
        assert!(OidcError::AlreadyDecided.is_replay());
        assert!(!OidcError::InvalidSession.is_replay());
    }

    #[test]
    fn internal_details_are_hidden() {
        let response = OidcError::Internal("connection refused to 10.0.0.3".into()).to_error_response();
        assert_eq!(response.error, "server_error");
        assert_eq!(response.error_description.as_deref(), Some("internal error"));
    }

    #[test]
    fn session_error_maps_to_invalid_session() {
        let err: OidcError = af_session::SessionError::InvalidSession.into();
        assert!(matches!(err, OidcError::InvalidSession));
    }
}
