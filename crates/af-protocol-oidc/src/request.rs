//! OIDC request types.
//!
//! Wire-shaped requests as handed over by the transport layer. Client
//! authentication has already happened when these reach the managers.

use serde::{Deserialize, Serialize};

use crate::types::{CodeChallengeMethod, GrantType, ResponseMode, parse_scope};

/// Authorization endpoint request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Response type (required).
    pub response_type: String,

    /// Client ID (required).
    pub client_id: String,

    /// Redirect URI (required).
    pub redirect_uri: String,

    /// Scope (space-separated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// State parameter (recommended for CSRF protection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Response mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<ResponseMode>,

    /// Nonce (required for implicit/hybrid flows).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// PKCE code challenge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE code challenge method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

impl AuthorizationRequest {
    /// Creates a request with the required parameters.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            response_type: response_type.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the state.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sets the PKCE challenge.
    #[must_use]
    pub fn with_pkce(mut self, challenge: impl Into<String>, method: CodeChallengeMethod) -> Self {
        self.code_challenge = Some(challenge.into());
        self.code_challenge_method = Some(method);
        self
    }

    /// Returns the scopes as a vector.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.as_deref().map(parse_scope).unwrap_or_default()
    }
}

/// Token endpoint request for the code and refresh grants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Grant type (required).
    pub grant_type: String,

    /// Client ID.
    pub client_id: String,

    /// Authorization code (for `authorization_code` grant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Redirect URI (for `authorization_code` grant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    /// Refresh token (for `refresh_token` grant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Scope (for `refresh_token` grant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Builds an `authorization_code` grant request.
    #[must_use]
    pub fn authorization_code(
        client_id: impl Into<String>,
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: GrantType::AuthorizationCode.as_str().to_string(),
            client_id: client_id.into(),
            code: Some(code.into()),
            redirect_uri: Some(redirect_uri.into()),
            ..Self::default()
        }
    }

    /// Sets the PKCE verifier.
    #[must_use]
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    /// Parses the grant type.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant type is unknown.
    pub fn parsed_grant_type(&self) -> Result<GrantType, String> {
        self.grant_type.parse()
    }
}

/// Token exchange request (RFC 8693 Section 2.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenExchangeRequest {
    /// Grant type, `urn:ietf:params:oauth:grant-type:token-exchange`.
    pub grant_type: String,

    /// Authenticated client making the request.
    pub client_id: String,

    /// Subject token.
    pub subject_token: String,

    /// Subject token type URI.
    pub subject_token_type: String,

    /// Actor token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_token: Option<String>,

    /// Actor token type URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_token_type: Option<String>,

    /// Requested token type URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_token_type: Option<String>,

    /// Scope (space-separated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Target audiences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,

    /// Target resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
}

impl TokenExchangeRequest {
    /// Creates a request for a subject token.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        subject_token: impl Into<String>,
        subject_token_type: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: GrantType::TokenExchange.as_str().to_string(),
            client_id: client_id.into(),
            subject_token: subject_token.into(),
            subject_token_type: subject_token_type.into(),
            ..Self::default()
        }
    }

    /// Adds an actor token.
    #[must_use]
    pub fn with_actor(mut self, token: impl Into<String>, token_type: impl Into<String>) -> Self {
        self.actor_token = Some(token.into());
        self.actor_token_type = Some(token_type.into());
        self
    }

    /// Sets the requested token type.
    #[must_use]
    pub fn with_requested_type(mut self, token_type: impl Into<String>) -> Self {
        self.requested_token_type = Some(token_type.into());
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Returns the requested scopes.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.as_deref().map(parse_scope).unwrap_or_default()
    }
}

/// Device authorization request (RFC 8628).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationRequest {
    /// Client ID (required).
    pub client_id: String,

    /// Scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Device token request (RFC 8628).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTokenRequest {
    /// Grant type (must be `device_code`).
    pub grant_type: String,

    /// Device code.
    pub device_code: String,

    /// Client ID.
    pub client_id: String,
}

impl DeviceTokenRequest {
    /// Creates a device token request.
    #[must_use]
    pub fn new(client_id: impl Into<String>, device_code: impl Into<String>) -> Self {
        Self {
            grant_type: GrantType::DeviceCode.as_str().to_string(),
            device_code: device_code.into(),
            client_id: client_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_request_scopes() {
        let request = AuthorizationRequest::new("test", "https://cb", "code")
            .with_scope("openid profile email openid");

        let scopes = request.scopes();
        assert_eq!(scopes, vec!["openid", "profile", "email"]);
    }

    #[test]
    fn token_exchange_deserializes_repeated_audience() {
        let request: TokenExchangeRequest = serde_json::from_value(serde_json::json!({
            "grant_type": "urn:ietf:params:oauth:grant-type:token-exchange",
            "client_id": "api",
            "subject_token": "abc",
            "subject_token_type": "urn:ietf:params:oauth:token-type:access_token",
            "audience": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(request.audience, vec!["a", "b"]);
        assert!(request.resource.is_empty());
        assert!(request.actor_token.is_none());
    }

    #[test]
    fn grant_types_parse() {
        let code = TokenRequest::authorization_code("web", "c", "https://cb");
        assert_eq!(code.parsed_grant_type().unwrap(), GrantType::AuthorizationCode);
        let device = DeviceTokenRequest::new("tv", "dc");
        assert_eq!(device.grant_type.parse::<GrantType>().unwrap(), GrantType::DeviceCode);
    }
}
