//! Token issuance.
//!
//! [`TokenIssuer`] mints access, ID and refresh tokens from a resolved
//! subject, audience, scope and authentication context. It knows nothing
//! about the flow that asked for the token.
//!
//! - Opaque access tokens are random values; only their SHA-384 is stored.
//! - JWTs are signed with the configured key (ES384 by default) and carry a
//!   `kid` header.
//! - Refresh tokens are single-use and rotate within a lineage that fixes
//!   subject, actor, client and the maximum scope.
//!
//! Expiry of every token kind is checked against the injected clock.

use std::sync::Arc;

use af_cache::{MemoryRecordStore, RecordStore, SingleUseTokens, TokenError};
use af_core::{AuditEvent, Clock, EventType, FlowConfig};
use af_crypto::random::random_base64url;
use af_crypto::{SignatureAlgorithm, half_hash_b64, sha384_b64};
use af_session::Session;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::claims::{AccessTokenClaims, ActorClaim, Audience, IdTokenClaims};
use crate::client::AccessTokenFormat;
use crate::error::{OidcError, OidcResult};
use crate::types::{join_scope, scopes};

/// `typ` header of JWT access tokens (RFC 9068).
pub const ACCESS_TOKEN_TYP: &str = "at+jwt";
/// `typ` header of ID tokens.
pub const ID_TOKEN_TYP: &str = "JWT";

/// Signing key for token generation.
#[derive(Clone)]
pub struct SigningKey {
    /// Key ID (kid).
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SignatureAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("encoding_key", &"[REDACTED]")
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

impl SigningKey {
    /// Creates a new signing key from PEM-encoded keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys are invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SignatureAlgorithm,
        private_key_pem: &[u8],
        public_key_pem: &[u8],
    ) -> OidcResult<Self> {
        let (encoding_key, decoding_key) = if algorithm.is_ecdsa() {
            (
                EncodingKey::from_ec_pem(private_key_pem),
                DecodingKey::from_ec_pem(public_key_pem),
            )
        } else {
            (
                EncodingKey::from_rsa_pem(private_key_pem),
                DecodingKey::from_rsa_pem(public_key_pem),
            )
        };

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key: encoding_key.map_err(|e| OidcError::TokenSigning(e.to_string()))?,
            decoding_key: decoding_key.map_err(|e| OidcError::TokenSigning(e.to_string()))?,
        })
    }

    const fn jwt_algorithm(&self) -> Algorithm {
        match self.algorithm {
            SignatureAlgorithm::Es384 => Algorithm::ES384,
            SignatureAlgorithm::Ps384 => Algorithm::PS384,
            SignatureAlgorithm::Rs384 => Algorithm::RS384,
        }
    }
}

/// How and when the subject authenticated.
///
/// Carried unchanged into every token derived from the authentication,
/// including exchanged and refreshed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Time of authentication.
    pub auth_time: DateTime<Utc>,
    /// Authentication methods references.
    pub amr: Vec<String>,
    /// Session the tokens belong to, if any.
    pub session_id: Option<String>,
}

impl AuthContext {
    /// Builds the context of a verified session.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            auth_time: session.auth_time,
            amr: session.amr(),
            session_id: Some(session.id.clone()),
        }
    }
}

/// Kinds of tokens the issuer mints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Opaque access token.
    Access,
    /// JWT access token.
    Jwt,
    /// `OpenID` Connect ID token.
    Id,
    /// Rotating opaque refresh token.
    Refresh,
}

impl TokenKind {
    /// Access token kind for a client's configured format.
    #[must_use]
    pub const fn access(format: AccessTokenFormat) -> Self {
        match format {
            AccessTokenFormat::Opaque => Self::Access,
            AccessTokenFormat::Jwt => Self::Jwt,
        }
    }
}

/// Everything a token is minted from.
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// Subject (user id).
    pub subject: String,
    /// Client the token is issued to.
    pub client_id: String,
    /// Acting party, for delegated tokens.
    pub actor: Option<ActorClaim>,
    /// Audience; empty means the client itself.
    pub audience: Vec<String>,
    /// Granted scope.
    pub scope: Vec<String>,
    /// Authentication context of the subject.
    pub auth: AuthContext,
    /// Nonce echoed into ID tokens.
    pub nonce: Option<String>,
    /// Access token format used when a refresh token of this grant is redeemed.
    pub access_format: AccessTokenFormat,
}

impl MintRequest {
    /// Creates a request for `subject` on behalf of `client_id`.
    #[must_use]
    pub fn new(subject: impl Into<String>, client_id: impl Into<String>, auth: AuthContext) -> Self {
        Self {
            subject: subject.into(),
            client_id: client_id.into(),
            actor: None,
            audience: Vec::new(),
            scope: Vec::new(),
            auth,
            nonce: None,
            access_format: AccessTokenFormat::default(),
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<ActorClaim>) -> Self {
        self.actor = actor;
        self
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the access token format for refreshes.
    #[must_use]
    pub const fn with_access_format(mut self, format: AccessTokenFormat) -> Self {
        self.access_format = format;
        self
    }

    fn effective_audience(&self) -> Vec<String> {
        if self.audience.is_empty() {
            vec![self.client_id.clone()]
        } else {
            self.audience.clone()
        }
    }
}

/// A minted token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Kind of token.
    pub kind: TokenKind,
    /// Token value as handed to the client.
    pub token: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Stored form of an opaque access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    /// Token id (`jti`).
    pub token_id: String,
    /// Subject.
    pub subject: String,
    /// Client the token was issued to.
    pub client_id: String,
    /// Audience.
    pub audience: Vec<String>,
    /// Scope.
    pub scope: Vec<String>,
    /// Acting party.
    pub actor: Option<ActorClaim>,
    /// Authentication context.
    pub auth: AuthContext,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// State shared by all refresh tokens of one grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshLineage {
    /// Lineage id; refresh tokens are bound to it.
    pub id: String,
    /// Subject.
    pub subject: String,
    /// Client the grant belongs to.
    pub client_id: String,
    /// Audience.
    pub audience: Vec<String>,
    /// Maximum scope a refresh may request.
    pub scope: Vec<String>,
    /// Acting party, preserved on every rotation.
    pub actor: Option<ActorClaim>,
    /// Authentication context of the original login.
    pub auth: AuthContext,
    /// Format of access tokens minted on refresh.
    pub access_format: AccessTokenFormat,
}

/// A validated access token, whatever its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Subject.
    pub subject: String,
    /// Client the token was issued to.
    pub client_id: Option<String>,
    /// Audience.
    pub audience: Vec<String>,
    /// Scope.
    pub scope: Vec<String>,
    /// Acting party.
    pub actor: Option<ActorClaim>,
    /// Authentication context.
    pub auth: AuthContext,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

impl TokenInfo {
    fn from_record(record: AccessTokenRecord) -> Self {
        Self {
            subject: record.subject,
            client_id: Some(record.client_id),
            audience: record.audience,
            scope: record.scope,
            actor: record.actor,
            auth: record.auth,
            expires_at: record.expires_at,
        }
    }

    /// Builds token info from decoded JWT claims.
    #[must_use]
    pub fn from_claims(claims: AccessTokenClaims) -> Self {
        let auth_time = claims.auth_time.unwrap_or(claims.iat);
        Self {
            subject: claims.sub,
            client_id: claims.client_id.or(claims.azp),
            audience: claims.aud.to_vec(),
            scope: claims
                .scope
                .as_deref()
                .map(crate::types::parse_scope)
                .unwrap_or_default(),
            actor: claims.act,
            auth: AuthContext {
                auth_time: timestamp(auth_time),
                amr: claims.amr,
                session_id: claims.sid,
            },
            expires_at: timestamp(claims.exp),
        }
    }

    /// Builds token info from ID token claims. The only authorized scope of
    /// an ID token is `openid`.
    #[must_use]
    pub fn from_id_token(claims: IdTokenClaims) -> Self {
        let auth_time = claims.auth_time.unwrap_or(claims.iat);
        Self {
            subject: claims.sub,
            client_id: claims.azp,
            audience: claims.aud.to_vec(),
            scope: vec![scopes::OPENID.to_string()],
            actor: claims.act,
            auth: AuthContext {
                auth_time: timestamp(auth_time),
                amr: claims.amr,
                session_id: claims.sid,
            },
            expires_at: timestamp(claims.exp),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn refresh_token_error(err: TokenError, client_id: &str) -> OidcError {
    match err {
        TokenError::Consumed => {
            AuditEvent::builder(EventType::ReplayDetected)
                .failure("refresh token reused")
                .client(client_id)
                .emit();
            OidcError::AlreadyConsumed("refresh token")
        }
        TokenError::Expired => OidcError::InvalidGrant("refresh token expired".to_string()),
        TokenError::Invalid => OidcError::InvalidGrant("invalid refresh token".to_string()),
        TokenError::Backend(e) => e.into(),
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Token type (always "Bearer").
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// Refresh token (if issued).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (if `OpenID` scope requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Which tokens a grant produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenSetOptions {
    /// Access token format.
    pub access_format: AccessTokenFormat,
    /// Issue an ID token (only honored with the `openid` scope).
    pub id_token: bool,
    /// Issue a refresh token.
    pub refresh_token: bool,
}

/// Introspection endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is active.
    pub active: bool,

    /// Token scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Token type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Acting party.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act: Option<ActorClaim>,
}

impl IntrospectionResponse {
    /// Creates an inactive introspection response.
    #[must_use]
    pub const fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            token_type: None,
            exp: None,
            sub: None,
            aud: None,
            iss: None,
            act: None,
        }
    }

    fn active(issuer: &str, info: TokenInfo) -> Self {
        Self {
            active: true,
            scope: Some(join_scope(&info.scope)),
            client_id: info.client_id,
            token_type: Some("Bearer".to_string()),
            exp: Some(info.expires_at.timestamp()),
            sub: Some(info.subject),
            aud: Some(info.audience.into()),
            iss: Some(issuer.to_string()),
            act: info.actor,
        }
    }
}

/// Mints and validates tokens.
pub struct TokenIssuer {
    config: FlowConfig,
    key: SigningKey,
    clock: Arc<dyn Clock>,
    access_tokens: Arc<dyn RecordStore<AccessTokenRecord>>,
    lineages: Arc<dyn RecordStore<RefreshLineage>>,
    refresh_tokens: SingleUseTokens,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.config.issuer)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer with in-memory token storage.
    #[must_use]
    pub fn new(config: FlowConfig, key: SigningKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            refresh_tokens: SingleUseTokens::in_memory(clock.clone()),
            access_tokens: Arc::new(MemoryRecordStore::new()),
            lineages: Arc::new(MemoryRecordStore::new()),
            config,
            key,
            clock,
        }
    }

    /// Replaces the token storage.
    #[must_use]
    pub fn with_storage(
        mut self,
        access_tokens: Arc<dyn RecordStore<AccessTokenRecord>>,
        lineages: Arc<dyn RecordStore<RefreshLineage>>,
        refresh_tokens: SingleUseTokens,
    ) -> Self {
        self.access_tokens = access_tokens;
        self.lineages = lineages;
        self.refresh_tokens = refresh_tokens;
        self
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Returns the access token lifespan in seconds.
    #[must_use]
    pub const fn access_token_lifespan(&self) -> i64 {
        self.config.access_token_lifespan
    }

    /// Mints one token.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::TokenSigning`] if signing fails and
    /// [`OidcError::Internal`] if storage fails.
    pub async fn mint(&self, kind: TokenKind, request: &MintRequest) -> OidcResult<IssuedToken> {
        match kind {
            TokenKind::Access => self.mint_opaque_access(request).await,
            TokenKind::Jwt => self.mint_jwt_access(request),
            TokenKind::Id => self.id_token(request, None),
            TokenKind::Refresh => self.mint_refresh(request).await,
        }
    }

    async fn mint_opaque_access(&self, request: &MintRequest) -> OidcResult<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(self.config.access_token_lifespan);
        let record = AccessTokenRecord {
            token_id: Uuid::now_v7().to_string(),
            subject: request.subject.clone(),
            client_id: request.client_id.clone(),
            audience: request.effective_audience(),
            scope: request.scope.clone(),
            actor: request.actor.clone(),
            auth: request.auth.clone(),
            issued_at: now,
            expires_at,
        };

        for _ in 0..2 {
            let token = random_base64url(32);
            if self
                .access_tokens
                .insert(&sha384_b64(token.as_bytes()), &[], record.clone())
                .await?
            {
                tracing::debug!(
                    token_id = %record.token_id,
                    subject = %record.subject,
                    delegated = record.actor.is_some(),
                    "opaque access token issued"
                );
                return Ok(IssuedToken {
                    kind: TokenKind::Access,
                    token,
                    expires_at,
                    expires_in: self.config.access_token_lifespan,
                });
            }
        }
        Err(OidcError::Internal("access token collision".to_string()))
    }

    fn mint_jwt_access(&self, request: &MintRequest) -> OidcResult<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(self.config.access_token_lifespan);
        let claims = AccessTokenClaims::new(
            self.config.issuer.clone(),
            request.subject.clone(),
            request.effective_audience(),
            now,
            expires_at,
        )
        .with_client(request.client_id.clone())
        .with_scope(join_scope(&request.scope))
        .with_authentication(request.auth.auth_time, request.auth.amr.clone())
        .with_session(request.auth.session_id.clone())
        .with_actor(request.actor.clone());

        Ok(IssuedToken {
            kind: TokenKind::Jwt,
            token: self.sign_token(&claims, ACCESS_TOKEN_TYP)?,
            expires_at,
            expires_in: self.config.access_token_lifespan,
        })
    }

    /// Mints an ID token, with `at_hash` when the access token it accompanies
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::TokenSigning`] if signing fails.
    pub fn id_token(&self, request: &MintRequest, access_token: Option<&str>) -> OidcResult<IssuedToken> {
        let now = self.clock.now();
        let expires_at = now + Duration::seconds(self.config.id_token_lifespan);
        let at_hash = access_token.map(|t| half_hash_b64(self.key.algorithm.hash_algorithm(), t));
        let claims = IdTokenClaims::new(
            self.config.issuer.clone(),
            request.subject.clone(),
            request.effective_audience(),
            now,
            expires_at,
        )
        .with_azp(request.client_id.clone())
        .with_authentication(request.auth.auth_time, request.auth.amr.clone())
        .with_nonce(request.nonce.clone())
        .with_session(request.auth.session_id.clone())
        .with_at_hash(at_hash)
        .with_actor(request.actor.clone());

        Ok(IssuedToken {
            kind: TokenKind::Id,
            token: self.sign_token(&claims, ID_TOKEN_TYP)?,
            expires_at,
            expires_in: self.config.id_token_lifespan,
        })
    }

    async fn mint_refresh(&self, request: &MintRequest) -> OidcResult<IssuedToken> {
        let lineage = RefreshLineage {
            id: Uuid::now_v7().to_string(),
            subject: request.subject.clone(),
            client_id: request.client_id.clone(),
            audience: request.effective_audience(),
            scope: request.scope.clone(),
            actor: request.actor.clone(),
            auth: request.auth.clone(),
            access_format: request.access_format,
        };
        if !self.lineages.insert(&lineage.id, &[], lineage.clone()).await? {
            return Err(OidcError::Internal("refresh lineage collision".to_string()));
        }
        self.issue_refresh(&lineage.id).await
    }

    async fn issue_refresh(&self, lineage_id: &str) -> OidcResult<IssuedToken> {
        let expires_at = self.clock.now() + Duration::seconds(self.config.refresh_token_lifespan);
        let token = self
            .refresh_tokens
            .issue(lineage_id, expires_at)
            .await
            .map_err(|e| OidcError::Internal(e.to_string()))?;
        Ok(IssuedToken {
            kind: TokenKind::Refresh,
            token,
            expires_at,
            expires_in: self.config.refresh_token_lifespan,
        })
    }

    /// Mints the token set of a completed grant.
    ///
    /// The ID token carries `at_hash` of the access token and is only issued
    /// when `openid` is in scope.
    ///
    /// # Errors
    ///
    /// Returns an error if any token cannot be minted.
    pub async fn token_set(
        &self,
        request: &MintRequest,
        options: TokenSetOptions,
    ) -> OidcResult<TokenResponse> {
        let access = self
            .mint(TokenKind::access(options.access_format), request)
            .await?;

        let id_token = if options.id_token && request.scope.iter().any(|s| s == scopes::OPENID) {
            Some(self.id_token(request, Some(&access.token))?.token)
        } else {
            None
        };

        let refresh_token = if options.refresh_token {
            let request = request.clone().with_access_format(options.access_format);
            Some(self.mint_refresh(&request).await?.token)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token: access.token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
            refresh_token,
            id_token,
            scope: Some(join_scope(&request.scope)),
        })
    }

    /// Redeems a refresh token and rotates it.
    ///
    /// The presented token is consumed; the response carries a new refresh
    /// token of the same lineage. `scope` may only narrow the lineage scope.
    /// The actor and authentication context of the lineage are preserved.
    ///
    /// # Errors
    ///
    /// - [`OidcError::AlreadyConsumed`] if the token was already redeemed
    /// - [`OidcError::InvalidGrant`] for unknown, expired or foreign tokens
    /// - [`OidcError::InvalidScope`] if `scope` widens the grant
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        scope: Option<&[String]>,
    ) -> OidcResult<TokenResponse> {
        let lineage_id = self
            .refresh_tokens
            .resolve(refresh_token)
            .await
            .map_err(|e| refresh_token_error(e, client_id))?;

        let lineage = self
            .lineages
            .get(&lineage_id)
            .await?
            .ok_or_else(|| OidcError::InvalidGrant("invalid refresh token".to_string()))?
            .record;

        if lineage.client_id != client_id {
            tracing::warn!(lineage = %lineage.id, client_id = %client_id, "refresh token presented by foreign client");
            return Err(OidcError::InvalidGrant(
                "refresh token was issued to another client".to_string(),
            ));
        }

        let granted = match scope {
            Some(requested) if !requested.is_empty() => {
                if let Some(extra) = requested.iter().find(|s| !lineage.scope.contains(s)) {
                    return Err(OidcError::InvalidScope(format!(
                        "scope {extra} was not granted"
                    )));
                }
                requested.to_vec()
            }
            _ => lineage.scope.clone(),
        };

        let request = MintRequest::new(lineage.subject.clone(), lineage.client_id.clone(), lineage.auth.clone())
            .with_audience(lineage.audience.clone())
            .with_scope(granted)
            .with_actor(lineage.actor.clone());

        let access = self
            .mint(TokenKind::access(lineage.access_format), &request)
            .await?;
        let id_token = if request.scope.iter().any(|s| s == scopes::OPENID) {
            Some(self.id_token(&request, Some(&access.token))?.token)
        } else {
            None
        };
        let rotated = self.issue_refresh(&lineage.id).await?;
        // the presented token is burned only once the request is known to be valid
        self.refresh_tokens
            .redeem(refresh_token, &lineage.id)
            .await
            .map_err(|e| refresh_token_error(e, client_id))?;

        AuditEvent::builder(EventType::RefreshTokenRotated)
            .user(&lineage.subject)
            .client(client_id)
            .aggregate(&lineage.id)
            .emit();

        Ok(TokenResponse {
            access_token: access.token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
            refresh_token: Some(rotated.token),
            id_token,
            scope: Some(join_scope(&request.scope)),
        })
    }

    /// Resolves an access token of either format.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidToken`] if the token is unknown, forged or
    /// expired.
    pub async fn resolve_access_token(&self, token: &str) -> OidcResult<TokenInfo> {
        if token.split('.').count() == 3 {
            let claims: AccessTokenClaims = self.validate_typed_jwt(token, ACCESS_TOKEN_TYP)?;
            return Ok(TokenInfo::from_claims(claims));
        }

        let record = self
            .access_tokens
            .get(&sha384_b64(token.as_bytes()))
            .await?
            .ok_or_else(|| OidcError::InvalidToken("unknown access token".to_string()))?
            .record;
        if self.clock.now() >= record.expires_at {
            return Err(OidcError::InvalidToken("access token expired".to_string()));
        }
        Ok(TokenInfo::from_record(record))
    }

    /// Resolves an ID token issued by this issuer.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidToken`] if the token is not a valid,
    /// unexpired ID token.
    pub fn resolve_id_token(&self, token: &str) -> OidcResult<TokenInfo> {
        let claims: IdTokenClaims = self.validate_typed_jwt(token, ID_TOKEN_TYP)?;
        Ok(TokenInfo::from_id_token(claims))
    }

    /// Introspects an access token (RFC 7662). Never fails: unusable tokens
    /// are reported inactive.
    pub async fn introspect(&self, token: &str) -> IntrospectionResponse {
        match self.resolve_access_token(token).await {
            Ok(info) => IntrospectionResponse::active(&self.config.issuer, info),
            Err(err) => {
                tracing::debug!(error = %err, "introspected token inactive");
                IntrospectionResponse::inactive()
            }
        }
    }

    /// Validates a JWT signed by this issuer and decodes its claims.
    ///
    /// Checks signature, `kid`, issuer and expiry (against the injected
    /// clock). Audience is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidToken`] on any validation failure.
    pub fn validate_jwt<T: DeserializeOwned>(&self, token: &str) -> OidcResult<T> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;
        if header.kid.as_deref() != Some(self.key.kid.as_str()) {
            return Err(OidcError::InvalidToken("unknown signing key".to_string()));
        }

        let mut validation = Validation::new(self.key.jwt_algorithm());
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<serde_json::Value>(token, &self.key.decoding_key, &validation)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;

        let exp = data
            .claims
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| OidcError::InvalidToken("missing exp".to_string()))?;
        if self.clock.now().timestamp() >= exp {
            return Err(OidcError::InvalidToken("token expired".to_string()));
        }

        serde_json::from_value(data.claims).map_err(|e| OidcError::InvalidToken(e.to_string()))
    }

    fn validate_typed_jwt<T: DeserializeOwned>(&self, token: &str, typ: &str) -> OidcResult<T> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| OidcError::InvalidToken(e.to_string()))?;
        if header.typ.as_deref() != Some(typ) {
            return Err(OidcError::InvalidToken(format!("expected a {typ} token")));
        }
        self.validate_jwt(token)
    }

    fn sign_token<T: Serialize>(&self, claims: &T, typ: &str) -> OidcResult<String> {
        let mut header = Header::new(self.key.jwt_algorithm());
        header.kid = Some(self.key.kid.clone());
        header.typ = Some(typ.to_string());

        encode(&header, claims, &self.key.encoding_key)
            .map_err(|e| OidcError::TokenSigning(e.to_string()))
    }
}
