//! Redirect construction and PKCE.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::{OidcError, OidcResult};
use crate::types::{CodeChallengeMethod, ResponseMode};

/// Builds a redirect URL carrying `params` in the query or fragment.
#[must_use]
pub fn build_redirect(redirect_uri: &str, params: &[(String, String)], mode: ResponseMode) -> String {
    let encoded_params: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    match mode {
        ResponseMode::Query => {
            let separator = if redirect_uri.contains('?') { "&" } else { "?" };
            format!("{redirect_uri}{separator}{encoded_params}")
        }
        ResponseMode::Fragment => format!("{redirect_uri}#{encoded_params}"),
    }
}

/// OAuth 2.0 authorization error returned to the client by redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationError {
    /// Error code, e.g. `access_denied`.
    pub error: String,
    /// Human-readable description.
    pub error_description: Option<String>,
    /// Page with more information.
    pub error_uri: Option<String>,
}

impl AuthorizationError {
    /// Creates an error with a code only.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
            error_uri: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    /// Sets the error URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.error_uri = Some(uri.into());
        self
    }

    /// Builds the redirect parameters.
    #[must_use]
    pub fn to_params(&self, state: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![("error".to_string(), self.error.clone())];

        if let Some(ref desc) = self.error_description {
            params.push(("error_description".to_string(), desc.clone()));
        }
        if let Some(ref uri) = self.error_uri {
            params.push(("error_uri".to_string(), uri.clone()));
        }
        if let Some(state) = state {
            params.push(("state".to_string(), state.to_string()));
        }

        params
    }
}

/// A PKCE code challenge presented at authorization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    /// The challenge.
    pub challenge: String,
    /// How the challenge was derived from the verifier.
    pub method: CodeChallengeMethod,
}

impl PkceChallenge {
    /// Validates and builds a challenge. The method defaults to `S256`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidRequest`] for a malformed challenge.
    pub fn new(challenge: &str, method: Option<CodeChallengeMethod>) -> OidcResult<Self> {
        if challenge.len() < 43 || challenge.len() > 128 {
            return Err(OidcError::InvalidRequest(
                "code_challenge must be between 43 and 128 characters".to_string(),
            ));
        }
        if !challenge
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(OidcError::InvalidRequest(
                "code_challenge contains invalid characters".to_string(),
            ));
        }
        Ok(Self {
            challenge: challenge.to_string(),
            method: method.unwrap_or_default(),
        })
    }

    /// Verifies a `code_verifier` against this challenge (RFC 7636).
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidGrant`] if the verifier is malformed or
    /// does not match.
    pub fn verify(&self, code_verifier: &str) -> OidcResult<()> {
        if code_verifier.len() < 43 || code_verifier.len() > 128 {
            return Err(OidcError::InvalidGrant(
                "code_verifier must be between 43 and 128 characters".to_string(),
            ));
        }

        if !code_verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(OidcError::InvalidGrant(
                "code_verifier contains invalid characters".to_string(),
            ));
        }

        let computed = match self.method {
            CodeChallengeMethod::Plain => code_verifier.to_string(),
            CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(af_crypto::sha256(code_verifier.as_bytes())),
        };

        if computed != self.challenge {
            return Err(OidcError::InvalidGrant("PKCE verification failed".to_string()));
        }
        Ok(())
    }
}
