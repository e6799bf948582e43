//! JWT claim types for OIDC tokens.
//!
//! Implements token claims as defined in:
//! - RFC 7519 (JSON Web Token)
//! - RFC 8693 Section 4.1 (`act` claim)
//! - `OpenID` Connect Core 1.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RFC 8693 actor claim.
///
/// Chained delegation nests the previous actor under `act`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorClaim {
    /// Issuer that authenticated the actor.
    pub iss: String,

    /// Actor subject.
    pub sub: String,

    /// Prior actor in a delegation chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<Box<ActorClaim>>,
}

impl ActorClaim {
    /// Creates an actor claim without a prior actor.
    #[must_use]
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            act: None,
        }
    }

    /// Nests `prior` under this actor.
    #[must_use]
    pub fn with_prior(mut self, prior: Option<Self>) -> Self {
        self.act = prior.map(Box::new);
        self
    }

    /// Returns the depth of the delegation chain, this actor included.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.act.as_ref().map_or(0, |prior| prior.depth())
    }
}

/// Access token claims.
///
/// Used for JWT access tokens and JWT-format exchange results. Also the shape
/// subject tokens are decoded into; ID tokens decode into it as well since the
/// fields they lack are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer - URL of the authorization server.
    pub iss: String,

    /// Subject - unique identifier for the user.
    pub sub: String,

    /// Audience - intended recipient(s) of the token.
    pub aud: Audience,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    pub iat: i64,

    /// JWT ID - unique identifier for the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Authentication time (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Authentication methods references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Authorized party - client ID that requested the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Session ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Scope - space-separated list of scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Acting party for delegated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<ActorClaim>,
}

impl AccessTokenClaims {
    /// Creates new access token claims.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<Audience>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience.into(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Some(Uuid::now_v7().to_string()),
            auth_time: None,
            amr: Vec::new(),
            azp: None,
            client_id: None,
            sid: None,
            scope: None,
            act: None,
        }
    }

    /// Sets the authorized party and client id.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        self.azp = Some(client_id.clone());
        self.client_id = Some(client_id);
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.sid = session_id;
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the authentication time and methods.
    #[must_use]
    pub fn with_authentication(mut self, auth_time: DateTime<Utc>, amr: Vec<String>) -> Self {
        self.auth_time = Some(auth_time.timestamp());
        self.amr = amr;
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<ActorClaim>) -> Self {
        self.act = actor;
        self
    }

    /// Checks expiry against `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer - URL of the authorization server.
    pub iss: String,

    /// Subject - unique identifier for the user.
    pub sub: String,

    /// Audience - client ID that requested the token.
    pub aud: Audience,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    pub iat: i64,

    /// Authentication time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Nonce (required if provided in request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication methods references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,

    /// Authorized party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Access token hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,

    /// Session ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Acting party for delegated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<ActorClaim>,
}

impl IdTokenClaims {
    /// Creates new ID token claims.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<Audience>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience.into(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            auth_time: None,
            nonce: None,
            amr: Vec::new(),
            azp: None,
            at_hash: None,
            sid: None,
            act: None,
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the access token hash.
    #[must_use]
    pub fn with_at_hash(mut self, at_hash: Option<String>) -> Self {
        self.at_hash = at_hash;
        self
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.sid = session_id;
        self
    }

    /// Sets the authorized party.
    #[must_use]
    pub fn with_azp(mut self, azp: impl Into<String>) -> Self {
        self.azp = Some(azp.into());
        self
    }

    /// Sets the authentication time and methods.
    #[must_use]
    pub fn with_authentication(mut self, auth_time: DateTime<Utc>, amr: Vec<String>) -> Self {
        self.auth_time = Some(auth_time.timestamp());
        self.amr = amr;
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<ActorClaim>) -> Self {
        self.act = actor;
        self
    }
}

/// JWT audience claim (can be single string or array).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience.
    Single(String),
    /// Multiple audiences.
    Multiple(Vec<String>),
}

impl Audience {
    /// Checks if the audience contains a specific value.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(s) => s == value,
            Self::Multiple(v) => v.iter().any(|s| s == value),
        }
    }

    /// Returns the audiences as a vector.
    #[must_use]
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }

    /// Returns owned audience values.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.as_vec().into_iter().map(str::to_string).collect()
    }
}

impl From<String> for Audience {
    fn from(s: String) -> Self {
        Self::Single(s)
    }
}

impl From<&str> for Audience {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<Vec<String>> for Audience {
    fn from(mut v: Vec<String>) -> Self {
        if v.len() == 1 {
            if let Some(single) = v.pop() {
                return Self::Single(single);
            }
        }
        Self::Multiple(v)
    }
}
