//! Authorization code and implicit flow.
//!
//! An [`AuthRequest`] is created from a client's authorize call, bound to an
//! authenticated session by the login UI and consumed exactly once by
//! [`AuthRequestManager::create_callback`]. Authorization codes are
//! single-use tokens bound to the auth request id.

use std::sync::Arc;

use af_cache::{MemoryRecordStore, RecordStore, SingleUseTokens, TokenError};
use af_core::{AuditEvent, Clock, EventType, FlowConfig};
use af_session::SessionVerifier;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{App, AppRegistry, LoginVersion};
use crate::error::{OidcError, OidcResult};
use crate::permission::PermissionChecker;
use crate::redirect::{AuthorizationError, PkceChallenge, build_redirect};
use crate::request::{AuthorizationRequest, TokenRequest};
use crate::token::{AuthContext, MintRequest, TokenIssuer, TokenKind, TokenResponse, TokenSetOptions};
use crate::types::{GrantType, ResponseMode, ResponseType, ResponseTypes, scopes};

const MAX_CAS_ATTEMPTS: usize = 8;

/// Lifecycle state of an auth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequestState {
    /// Created, no session yet.
    Pending,
    /// A session is attached.
    Bound,
    /// Callback issued with a code or tokens.
    Succeeded,
    /// Callback issued with an error.
    Failed,
}

impl AuthRequestState {
    /// Returns whether a callback was already issued.
    #[must_use]
    pub const fn is_consumed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A pending or completed authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Request id.
    pub id: String,
    /// Requesting client.
    pub client_id: String,
    /// Registered redirect URI the callback goes to.
    pub redirect_uri: String,
    /// Granted scope.
    pub scope: Vec<String>,
    /// Audience of the tokens (project and client).
    pub audience: Vec<String>,
    /// Requested response types.
    pub response_types: ResponseTypes,
    /// How callback parameters are delivered.
    pub response_mode: ResponseMode,
    /// Client state, echoed back.
    pub state: Option<String>,
    /// Nonce for the ID token.
    pub nonce: Option<String>,
    /// PKCE challenge.
    pub pkce: Option<PkceChallenge>,
    /// Whether `offline_access` was granted.
    pub need_refresh_token: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Login UI that claimed the request, if created with the login client header.
    pub login_client: Option<String>,
    /// Where the browser is sent to log in.
    pub login_url: String,
    /// Attached session.
    pub session_id: Option<String>,
    /// Authenticated user, set on a successful callback.
    pub user_id: Option<String>,
    /// Authentication context, set on a successful callback.
    pub auth: Option<AuthContext>,
    /// Lifecycle state.
    pub status: AuthRequestState,
}

/// Result of the login, reported by the login UI.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The user authenticated with this session.
    Session {
        /// Session id.
        session_id: String,
        /// Session token proving possession.
        session_token: String,
    },
    /// The login failed or was cancelled.
    Error(AuthorizationError),
}

/// Manages authorization requests.
pub struct AuthRequestManager {
    config: FlowConfig,
    apps: Arc<dyn AppRegistry>,
    sessions: Arc<dyn SessionVerifier>,
    permissions: PermissionChecker,
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    records: Arc<dyn RecordStore<AuthRequest>>,
    codes: SingleUseTokens,
}

impl std::fmt::Debug for AuthRequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequestManager")
            .field("issuer", &self.config.issuer)
            .finish_non_exhaustive()
    }
}

impl AuthRequestManager {
    /// Creates a manager with in-memory storage.
    #[must_use]
    pub fn new(
        config: FlowConfig,
        apps: Arc<dyn AppRegistry>,
        sessions: Arc<dyn SessionVerifier>,
        permissions: PermissionChecker,
        issuer: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records: Arc::new(MemoryRecordStore::new()),
            codes: SingleUseTokens::in_memory(clock.clone()),
            config,
            apps,
            sessions,
            permissions,
            issuer,
            clock,
        }
    }

    /// Replaces the storage.
    #[must_use]
    pub fn with_storage(
        mut self,
        records: Arc<dyn RecordStore<AuthRequest>>,
        codes: SingleUseTokens,
    ) -> Self {
        self.records = records;
        self.codes = codes;
        self
    }

    async fn app(&self, client_id: &str) -> OidcResult<App> {
        self.apps
            .get_app(client_id)
            .await?
            .ok_or_else(|| OidcError::InvalidClient(format!("unknown client {client_id}")))
    }

    fn login_url(&self, app: &App, id: &str) -> String {
        match &app.login_version {
            LoginVersion::V1 => format!(
                "{}/ui/login/login?authRequestID={}",
                self.config.issuer.trim_end_matches('/'),
                urlencoding::encode(id)
            ),
            LoginVersion::V2 { base_uri } => {
                let separator = if base_uri.contains('?') { '&' } else { '?' };
                format!("{base_uri}{separator}authRequest={}", urlencoding::encode(id))
            }
        }
    }

    /// Creates an auth request from a client's authorize call.
    ///
    /// `login_client` is the user id of the login UI presenting the login
    /// client header, if any.
    ///
    /// # Errors
    ///
    /// - [`OidcError::InvalidClient`] for unknown clients
    /// - [`OidcError::InvalidRedirect`] for unregistered redirect URIs
    /// - [`OidcError::UnauthorizedClient`] for response types the client may not use
    /// - [`OidcError::InvalidRequest`] for malformed parameters, a missing
    ///   nonce on implicit requests or a missing required PKCE challenge
    pub async fn create(
        &self,
        request: AuthorizationRequest,
        login_client: Option<&str>,
    ) -> OidcResult<AuthRequest> {
        let app = self.app(&request.client_id).await?;

        url::Url::parse(&request.redirect_uri)
            .map_err(|e| OidcError::InvalidRequest(format!("redirect_uri: {e}")))?;
        if !app.is_redirect_allowed(&request.redirect_uri) {
            tracing::warn!(client_id = %app.client_id, "redirect_uri not registered");
            return Err(OidcError::InvalidRedirect);
        }

        let response_types: ResponseTypes = request
            .response_type
            .parse()
            .map_err(OidcError::InvalidRequest)?;
        if !app.allows_response_types(&response_types) {
            return Err(OidcError::UnauthorizedClient(format!(
                "response_type {} not allowed",
                request.response_type
            )));
        }
        if !response_types.is_code_flow() && request.nonce.is_none() {
            return Err(OidcError::InvalidRequest(
                "nonce is required for implicit and hybrid flows".to_string(),
            ));
        }

        let pkce = match (&request.code_challenge, request.code_challenge_method) {
            (Some(challenge), method) => Some(PkceChallenge::new(challenge, method)?),
            (None, Some(_)) => {
                return Err(OidcError::InvalidRequest(
                    "code_challenge_method requires code_challenge".to_string(),
                ));
            }
            (None, None) if app.pkce_required => {
                return Err(OidcError::InvalidRequest("code_challenge is required".to_string()));
            }
            (None, None) => None,
        };

        let mut scope = request.scopes();
        if !app.allows_grant(GrantType::RefreshToken) {
            scope.retain(|s| s != scopes::OFFLINE_ACCESS);
        }
        let need_refresh_token = scope.iter().any(|s| s == scopes::OFFLINE_ACCESS);

        let mut audience = vec![app.project_id.clone()];
        if app.client_id != app.project_id {
            audience.push(app.client_id.clone());
        }

        let id = format!("V2_{}", Uuid::now_v7());
        let auth_request = AuthRequest {
            login_url: self.login_url(&app, &id),
            id,
            client_id: app.client_id.clone(),
            redirect_uri: request.redirect_uri,
            scope,
            audience,
            response_mode: request
                .response_mode
                .unwrap_or_else(|| response_types.default_mode()),
            response_types,
            state: request.state,
            nonce: request.nonce,
            pkce,
            need_refresh_token,
            created_at: self.clock.now(),
            login_client: login_client.map(str::to_string),
            session_id: None,
            user_id: None,
            auth: None,
            status: AuthRequestState::Pending,
        };

        if !self
            .records
            .insert(&auth_request.id, &[], auth_request.clone())
            .await?
        {
            return Err(OidcError::Internal("auth request id collision".to_string()));
        }

        tracing::info!(
            auth_request = %auth_request.id,
            client_id = %auth_request.client_id,
            login_client = auth_request.login_client.is_some(),
            "auth request created"
        );
        AuditEvent::builder(EventType::AuthRequestCreated)
            .client(&auth_request.client_id)
            .aggregate(&auth_request.id)
            .emit();

        Ok(auth_request)
    }

    /// Returns an auth request, before or after consumption.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::NotFound`] for unknown ids.
    pub async fn get(&self, id: &str) -> OidcResult<AuthRequest> {
        Ok(self
            .records
            .get(id)
            .await?
            .ok_or(OidcError::NotFound("auth request"))?
            .record)
    }

    /// Applies `apply` with compare-and-swap, re-reading on contention.
    async fn transition<F>(&self, id: &str, mut apply: F) -> OidcResult<AuthRequest>
    where
        F: FnMut(&AuthRequest) -> OidcResult<AuthRequest>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .records
                .get(id)
                .await?
                .ok_or(OidcError::NotFound("auth request"))?;
            let next = apply(&current.record)?;
            if self.records.replace(id, current.version, next.clone()).await? {
                return Ok(next);
            }
        }
        Err(OidcError::Internal("auth request update contended".to_string()))
    }

    fn replay(&self, auth_request: &AuthRequest, operation: &str) -> OidcError {
        tracing::warn!(auth_request = %auth_request.id, operation, "auth request already consumed");
        AuditEvent::builder(EventType::ReplayDetected)
            .failure("Errors.AuthRequest.AlreadyHandled")
            .client(&auth_request.client_id)
            .aggregate(&auth_request.id)
            .detail("operation", operation)
            .emit();
        OidcError::AlreadyConsumed("auth request")
    }

    /// Attaches a session to a pending auth request.
    ///
    /// `caller` is the user id of the login UI. A request created with the
    /// login client header may only be bound by that login client; other
    /// callers, and any caller of a request created without the header,
    /// need the login client role. Repeated binds before the callback
    /// replace the session.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NotFound`] for unknown ids
    /// - [`OidcError::PermissionDenied`] for foreign callers without override
    /// - [`OidcError::AlreadyConsumed`] after the callback was issued
    pub async fn bind_session(&self, id: &str, session_id: &str, caller: &str) -> OidcResult<()> {
        let current = self.get(id).await?;
        if current.status.is_consumed() {
            return Err(self.replay(&current, "bind_session"));
        }

        let own_request = current.login_client.as_deref() == Some(caller);
        if !own_request && !self.permissions.can_link_session(caller).await? {
            tracing::warn!(auth_request = %id, caller = %caller, "bind by foreign login client");
            return Err(OidcError::PermissionDenied(
                "Errors.AuthRequest.WrongLoginClient".to_string(),
            ));
        }

        let bound = self
            .transition(id, |record| {
                if record.status.is_consumed() {
                    return Err(OidcError::AlreadyConsumed("auth request"));
                }
                let mut next = record.clone();
                next.session_id = Some(session_id.to_string());
                next.status = AuthRequestState::Bound;
                Ok(next)
            })
            .await
            .map_err(|err| match err {
                OidcError::AlreadyConsumed(_) => self.replay(&current, "bind_session"),
                other => other,
            })?;

        tracing::debug!(auth_request = %id, "session bound");
        AuditEvent::builder(EventType::SessionBound)
            .client(&bound.client_id)
            .aggregate(&bound.id)
            .detail("session_id", session_id)
            .emit();
        Ok(())
    }

    /// Finishes the auth request and returns the callback URL.
    ///
    /// A session outcome verifies the session token, re-checks the user's
    /// access to the project and issues a code or implicit tokens. An error
    /// outcome produces an OAuth2 error redirect. Either way the request is
    /// consumed exactly once.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NotFound`] for unknown ids
    /// - [`OidcError::AlreadyConsumed`] if a callback was already issued
    /// - [`OidcError::InvalidSession`] if the session token does not verify
    ///   or the session is not the one bound
    /// - [`OidcError::PermissionDenied`] if the user lacks access to the project
    pub async fn create_callback(&self, id: &str, outcome: CallbackOutcome) -> OidcResult<String> {
        let current = self.get(id).await?;
        if current.status.is_consumed() {
            return Err(self.replay(&current, "create_callback"));
        }

        match outcome {
            CallbackOutcome::Error(error) => self.error_callback(&current, &error).await,
            CallbackOutcome::Session {
                session_id,
                session_token,
            } => self.session_callback(&current, &session_id, &session_token).await,
        }
    }

    async fn error_callback(
        &self,
        current: &AuthRequest,
        error: &AuthorizationError,
    ) -> OidcResult<String> {
        let failed = self
            .transition(&current.id, |record| {
                if record.status.is_consumed() {
                    return Err(OidcError::AlreadyConsumed("auth request"));
                }
                let mut next = record.clone();
                next.status = AuthRequestState::Failed;
                Ok(next)
            })
            .await
            .map_err(|err| match err {
                OidcError::AlreadyConsumed(_) => self.replay(current, "create_callback"),
                other => other,
            })?;

        AuditEvent::builder(EventType::CallbackCreated)
            .failure(&error.error)
            .client(&failed.client_id)
            .aggregate(&failed.id)
            .emit();

        Ok(build_redirect(
            &failed.redirect_uri,
            &error.to_params(failed.state.as_deref()),
            failed.response_mode,
        ))
    }

    async fn session_callback(
        &self,
        current: &AuthRequest,
        session_id: &str,
        session_token: &str,
    ) -> OidcResult<String> {
        if current.session_id.as_deref() != Some(session_id) {
            tracing::warn!(auth_request = %current.id, "callback session differs from bound session");
            return Err(OidcError::InvalidSession);
        }
        let session = self
            .sessions
            .verify_session_token(session_id, session_token)
            .await?;

        let app = self.app(&current.client_id).await?;
        self.permissions
            .check_user_grant(&app, &session.user_id, &session.resource_owner)
            .await?;

        let auth = AuthContext::from_session(&session);

        // artifacts exist before the request is consumed; a losing racer's
        // code and tokens are never handed out and expire unused
        let mut params = Vec::new();
        if current.response_types.contains(ResponseType::Code) {
            let expires_at = self.clock.now() + Duration::seconds(self.config.auth_code_lifespan);
            let code = self
                .codes
                .issue(&current.id, expires_at)
                .await
                .map_err(|e| OidcError::Internal(e.to_string()))?;
            params.push(("code".to_string(), code));
        }

        let mint = MintRequest::new(session.user_id.clone(), current.client_id.clone(), auth.clone())
            .with_scope(current.scope.clone())
            .with_audience(current.audience.clone())
            .with_nonce(current.nonce.clone());

        let mut access_token = None;
        if current.response_types.contains(ResponseType::Token) {
            let access = self
                .issuer
                .mint(TokenKind::access(app.access_token_format), &mint)
                .await?;
            params.push(("access_token".to_string(), access.token.clone()));
            params.push(("token_type".to_string(), "Bearer".to_string()));
            params.push(("expires_in".to_string(), access.expires_in.to_string()));
            access_token = Some(access.token);
        }
        if current.response_types.contains(ResponseType::IdToken) {
            let id_token = self.issuer.id_token(&mint, access_token.as_deref())?;
            params.push(("id_token".to_string(), id_token.token));
        }
        if let Some(state) = &current.state {
            params.push(("state".to_string(), state.clone()));
        }

        let succeeded = self
            .transition(&current.id, |record| {
                if record.status.is_consumed() {
                    return Err(OidcError::AlreadyConsumed("auth request"));
                }
                if record.session_id.as_deref() != Some(session_id) {
                    return Err(OidcError::InvalidSession);
                }
                let mut next = record.clone();
                next.user_id = Some(session.user_id.clone());
                next.auth = Some(auth.clone());
                next.status = AuthRequestState::Succeeded;
                Ok(next)
            })
            .await
            .map_err(|err| match err {
                OidcError::AlreadyConsumed(_) => self.replay(current, "create_callback"),
                other => other,
            })?;

        tracing::info!(
            auth_request = %succeeded.id,
            client_id = %succeeded.client_id,
            user_id = %session.user_id,
            "auth request callback created"
        );
        AuditEvent::builder(EventType::CallbackCreated)
            .user(&session.user_id)
            .client(&succeeded.client_id)
            .aggregate(&succeeded.id)
            .emit();

        Ok(build_redirect(
            &succeeded.redirect_uri,
            &params,
            succeeded.response_mode,
        ))
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Checks client, redirect URI and PKCE verifier before redeeming the
    /// code, so only one of several concurrent exchanges succeeds.
    ///
    /// # Errors
    ///
    /// - [`OidcError::InvalidGrant`] for unknown, expired or mismatched codes
    ///   and failed PKCE verification
    /// - [`OidcError::AlreadyConsumed`] if the code was already exchanged
    pub async fn exchange_code(&self, request: &TokenRequest) -> OidcResult<TokenResponse> {
        if request.parsed_grant_type() != Ok(GrantType::AuthorizationCode) {
            return Err(OidcError::InvalidRequest(format!(
                "unsupported grant_type {}",
                request.grant_type
            )));
        }
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| OidcError::InvalidRequest("code is required".to_string()))?;

        let id = self.codes.resolve(code).await.map_err(|err| match err {
            TokenError::Expired => OidcError::InvalidGrant("code expired".to_string()),
            TokenError::Backend(e) => e.into(),
            TokenError::Invalid | TokenError::Consumed => {
                OidcError::InvalidGrant("invalid code".to_string())
            }
        })?;
        let auth_request = self
            .get(&id)
            .await
            .map_err(|_| OidcError::InvalidGrant("invalid code".to_string()))?;

        if auth_request.client_id != request.client_id {
            tracing::warn!(auth_request = %id, client_id = %request.client_id, "code presented by foreign client");
            return Err(OidcError::InvalidGrant("code was issued to another client".to_string()));
        }
        if request.redirect_uri.as_deref() != Some(auth_request.redirect_uri.as_str()) {
            return Err(OidcError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        if let Some(pkce) = &auth_request.pkce {
            let verifier = request
                .code_verifier
                .as_deref()
                .ok_or_else(|| OidcError::InvalidGrant("code_verifier is required".to_string()))?;
            pkce.verify(verifier)?;
        }
        let (Some(user_id), Some(auth)) = (&auth_request.user_id, &auth_request.auth) else {
            return Err(OidcError::InvalidGrant("auth request not authenticated".to_string()));
        };

        match self.codes.redeem(code, &id).await {
            Ok(()) => {}
            Err(TokenError::Consumed) => {
                AuditEvent::builder(EventType::ReplayDetected)
                    .failure("authorization code reused")
                    .client(&auth_request.client_id)
                    .aggregate(&id)
                    .emit();
                return Err(OidcError::AlreadyConsumed("authorization code"));
            }
            Err(TokenError::Expired) => return Err(OidcError::InvalidGrant("code expired".to_string())),
            Err(TokenError::Invalid) => return Err(OidcError::InvalidGrant("invalid code".to_string())),
            Err(TokenError::Backend(e)) => return Err(e.into()),
        }

        let app = self.app(&auth_request.client_id).await?;
        let mint = MintRequest::new(user_id.clone(), auth_request.client_id.clone(), auth.clone())
            .with_scope(auth_request.scope.clone())
            .with_audience(auth_request.audience.clone())
            .with_nonce(auth_request.nonce.clone());
        let response = self
            .issuer
            .token_set(
                &mint,
                TokenSetOptions {
                    access_format: app.access_token_format,
                    id_token: true,
                    refresh_token: auth_request.need_refresh_token
                        && app.allows_grant(GrantType::RefreshToken),
                },
            )
            .await?;

        AuditEvent::builder(EventType::CodeExchanged)
            .user(user_id)
            .client(&auth_request.client_id)
            .aggregate(&id)
            .emit();
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryAppRegistry;
    use crate::permission::{IAM_LOGIN_CLIENT, InMemoryGrantStore, InMemoryUserDirectory, RoleScope};
    use crate::token::tests::{OutageTokenStore, test_issuer};
    use af_crypto::MacKey;
    use crate::types::CodeChallengeMethod;
    use af_core::{InstancePolicy, ManualClock};
    use af_session::{AuthMethod, InMemorySessionVerifier};

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    struct Fixture {
        manager: AuthRequestManager,
        sessions: Arc<InMemorySessionVerifier>,
        grants: Arc<InMemoryGrantStore>,
        issuer: Arc<TokenIssuer>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let apps = Arc::new(InMemoryAppRegistry::new());
        apps.register(
            App::new("web", "project-1", "org-1")
                .with_redirect_uri("https://cb")
                .unwrap()
                .with_grant_type(GrantType::RefreshToken),
        )
        .await;
        apps.register(
            App::new("spa", "project-1", "org-1")
                .with_redirect_uri("https://spa/*")
                .unwrap()
                .with_grant_type(GrantType::Implicit)
                .with_response_type(ResponseType::IdToken)
                .with_response_type(ResponseType::Token)
                .with_pkce_required(),
        )
        .await;
        apps.register(
            App::new("console", "project-1", "org-1")
                .with_redirect_uri("https://console/cb")
                .unwrap()
                .with_login_version(LoginVersion::V2 {
                    base_uri: "https://login.example.com/login".to_string(),
                }),
        )
        .await;

        let sessions = Arc::new(InMemorySessionVerifier::new(clock.clone()));
        let grants = Arc::new(InMemoryGrantStore::new());
        grants.add_role("login-ui", RoleScope::Instance, IAM_LOGIN_CLIENT).await;
        let permissions = PermissionChecker::new(
            grants.clone(),
            Arc::new(InMemoryUserDirectory::new()),
            InstancePolicy::default(),
        );
        let issuer = Arc::new(test_issuer(clock.clone()));
        let manager = AuthRequestManager::new(
            FlowConfig::default(),
            apps,
            sessions.clone(),
            permissions,
            issuer.clone(),
            clock.clone(),
        );
        Fixture {
            manager,
            sessions,
            grants,
            issuer,
            clock,
        }
    }

    fn code_request() -> AuthorizationRequest {
        AuthorizationRequest::new("web", "https://cb", "code")
            .with_scope("openid offline_access")
            .with_state("xyz")
            .with_pkce(CHALLENGE, CodeChallengeMethod::S256)
    }

    fn code_from(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        parsed
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn create_validates_client_and_redirect() {
        let f = fixture().await;
        let unknown = f
            .manager
            .create(AuthorizationRequest::new("nope", "https://cb", "code"), None)
            .await;
        assert!(matches!(unknown, Err(OidcError::InvalidClient(_))));

        let bad_redirect = f
            .manager
            .create(AuthorizationRequest::new("web", "https://evil", "code"), None)
            .await;
        assert!(matches!(bad_redirect, Err(OidcError::InvalidRedirect)));

        let implicit = f
            .manager
            .create(AuthorizationRequest::new("web", "https://cb", "id_token").with_nonce("n"), None)
            .await;
        assert!(matches!(implicit, Err(OidcError::UnauthorizedClient(_))));
    }

    #[tokio::test]
    async fn create_shapes_request() {
        let f = fixture().await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        assert_eq!(request.status, AuthRequestState::Pending);
        assert_eq!(request.response_mode, ResponseMode::Query);
        assert!(request.need_refresh_token);
        assert_eq!(request.audience, vec!["project-1", "web"]);
        assert!(request.login_url.contains(&request.id));
        assert_eq!(f.manager.get(&request.id).await.unwrap(), request);
    }

    #[tokio::test]
    async fn login_url_follows_login_version() {
        let f = fixture().await;
        let request = f
            .manager
            .create(AuthorizationRequest::new("console", "https://console/cb", "code"), None)
            .await
            .unwrap();
        assert_eq!(
            request.login_url,
            format!("https://login.example.com/login?authRequest={}", request.id)
        );
    }

    #[tokio::test]
    async fn implicit_requires_nonce_and_pkce_policy() {
        let f = fixture().await;
        let no_nonce = f
            .manager
            .create(AuthorizationRequest::new("spa", "https://spa/cb", "id_token token"), None)
            .await;
        assert!(matches!(no_nonce, Err(OidcError::InvalidRequest(_))));

        let no_pkce = f
            .manager
            .create(
                AuthorizationRequest::new("spa", "https://spa/cb", "id_token").with_nonce("n"),
                None,
            )
            .await;
        assert!(matches!(no_pkce, Err(OidcError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn offline_access_dropped_without_refresh_grant() {
        let f = fixture().await;
        let request = f
            .manager
            .create(
                AuthorizationRequest::new("spa", "https://spa/cb", "id_token")
                    .with_nonce("n")
                    .with_scope("openid offline_access")
                    .with_pkce(CHALLENGE, CodeChallengeMethod::S256),
                None,
            )
            .await
            .unwrap();
        assert_eq!(request.scope, vec!["openid"]);
        assert!(!request.need_refresh_token);
        assert_eq!(request.response_mode, ResponseMode::Fragment);
    }

    #[tokio::test]
    async fn bind_session_rules() {
        let f = fixture().await;
        let request = f.manager.create(code_request(), Some("login-a")).await.unwrap();

        let foreign = f.manager.bind_session(&request.id, "s1", "login-b").await;
        assert!(matches!(foreign, Err(OidcError::PermissionDenied(_))));

        f.manager.bind_session(&request.id, "s1", "login-a").await.unwrap();
        // override permission and last write wins
        f.manager.bind_session(&request.id, "s2", "login-ui").await.unwrap();
        assert_eq!(
            f.manager.get(&request.id).await.unwrap().session_id.as_deref(),
            Some("s2")
        );

        let missing = f.manager.bind_session("V2_missing", "s1", "login-a").await;
        assert!(matches!(missing, Err(OidcError::NotFound(_))));
    }

    #[tokio::test]
    async fn legacy_request_needs_login_client_role() {
        let f = fixture().await;
        let request = f.manager.create(code_request(), None).await.unwrap();
        assert!(f.manager.bind_session(&request.id, "s1", "someone").await.is_err());
        f.manager.bind_session(&request.id, "s1", "login-ui").await.unwrap();
    }

    #[tokio::test]
    async fn code_flow_end_to_end() {
        let f = fixture().await;
        let (session, token) = f
            .sessions
            .create_session("user-1", "org-1", &[AuthMethod::Passkey])
            .await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();

        let url = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id.clone(),
                    session_token: token.clone(),
                },
            )
            .await
            .unwrap();
        assert!(url.starts_with("https://cb?code="));
        assert!(url.ends_with("&state=xyz"));

        let again = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id.clone(),
                    session_token: token,
                },
            )
            .await;
        assert!(matches!(again, Err(OidcError::AlreadyConsumed(_))));
        assert!(f.manager.bind_session(&request.id, "s9", "login-ui").await.is_err());

        let code = code_from(&url);
        let exchange = TokenRequest::authorization_code("web", code.clone(), "https://cb")
            .with_code_verifier(VERIFIER);
        let tokens = f.manager.exchange_code(&exchange).await.unwrap();
        assert!(tokens.id_token.is_some());
        assert!(tokens.refresh_token.is_some());

        let info = f.issuer.resolve_access_token(&tokens.access_token).await.unwrap();
        assert_eq!(info.subject, "user-1");
        assert!(info.auth.amr.contains(&"mfa".to_string()));

        let replay = f.manager.exchange_code(&exchange).await;
        assert!(replay.is_err());
    }

    #[tokio::test]
    async fn wrong_session_token_rejected_without_consuming() {
        let f = fixture().await;
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();

        let bad = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id.clone(),
                    session_token: "forged".to_string(),
                },
            )
            .await;
        assert!(matches!(bad, Err(OidcError::InvalidSession)));

        f.manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id,
                    session_token: token,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn code_store_outage_leaves_request_bound() {
        let f = fixture().await;
        let store = Arc::new(OutageTokenStore::default());
        let manager = f.manager.with_storage(
            Arc::new(MemoryRecordStore::new()),
            SingleUseTokens::new(store.clone(), MacKey::generate(), f.clock.clone()),
        );
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = manager.create(code_request(), Some("login-ui")).await.unwrap();
        manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();
        let outcome = CallbackOutcome::Session {
            session_id: session.id.clone(),
            session_token: token,
        };

        store.set_down(true);
        let failed = manager.create_callback(&request.id, outcome.clone()).await;
        assert!(matches!(failed, Err(OidcError::Internal(_))));
        assert_eq!(
            manager.get(&request.id).await.unwrap().status,
            AuthRequestState::Bound
        );

        store.set_down(false);
        let url = manager.create_callback(&request.id, outcome).await.unwrap();
        assert!(!code_from(&url).is_empty());
    }

    #[tokio::test]
    async fn grant_checked_at_callback_time() {
        let f = fixture().await;
        let apps = Arc::new(InMemoryAppRegistry::new());
        apps.register(
            App::new("web", "project-1", "org-1")
                .with_redirect_uri("https://cb")
                .unwrap()
                .with_project_checks(true, false),
        )
        .await;
        let manager = AuthRequestManager::new(
            FlowConfig::default(),
            apps,
            f.sessions.clone(),
            PermissionChecker::new(
                f.grants.clone(),
                Arc::new(InMemoryUserDirectory::new()),
                InstancePolicy::default(),
            ),
            f.issuer.clone(),
            f.clock.clone(),
        );

        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = manager
            .create(AuthorizationRequest::new("web", "https://cb", "code"), Some("login-ui"))
            .await
            .unwrap();
        manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();
        let outcome = CallbackOutcome::Session {
            session_id: session.id.clone(),
            session_token: token.clone(),
        };

        let denied = manager.create_callback(&request.id, outcome.clone()).await;
        assert!(matches!(denied, Err(OidcError::PermissionDenied(_))));

        // grant added after the request was created is honored
        f.grants.grant_project("user-1", "project-1").await;
        manager.create_callback(&request.id, outcome).await.unwrap();
    }

    #[tokio::test]
    async fn error_outcome_redirects_without_credentials() {
        let f = fixture().await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        let url = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Error(
                    AuthorizationError::new("access_denied").with_description("user cancelled"),
                ),
            )
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://cb?error=access_denied&error_description=user%20cancelled&state=xyz"
        );
        assert_eq!(
            f.manager.get(&request.id).await.unwrap().status,
            AuthRequestState::Failed
        );
    }

    #[tokio::test]
    async fn implicit_callback_uses_fragment() {
        let f = fixture().await;
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = f
            .manager
            .create(
                AuthorizationRequest::new("spa", "https://spa/cb", "id_token token")
                    .with_nonce("n-1")
                    .with_scope("openid")
                    .with_pkce(CHALLENGE, CodeChallengeMethod::S256),
                Some("login-ui"),
            )
            .await
            .unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();
        let url = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id,
                    session_token: token,
                },
            )
            .await
            .unwrap();

        assert!(url.starts_with("https://spa/cb#access_token="));
        assert!(url.contains("&token_type=Bearer&expires_in=300&id_token="));
        assert!(!url.contains("code="));
    }

    #[tokio::test]
    async fn code_checks_client_redirect_and_verifier() {
        let f = fixture().await;
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();
        let url = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id,
                    session_token: token,
                },
            )
            .await
            .unwrap();
        let code = code_from(&url);

        let other_client = TokenRequest::authorization_code("spa", code.clone(), "https://cb")
            .with_code_verifier(VERIFIER);
        assert!(matches!(
            f.manager.exchange_code(&other_client).await,
            Err(OidcError::InvalidGrant(_))
        ));
        let no_verifier = TokenRequest::authorization_code("web", code.clone(), "https://cb");
        assert!(f.manager.exchange_code(&no_verifier).await.is_err());

        // failed checks do not burn the code
        let good = TokenRequest::authorization_code("web", code, "https://cb").with_code_verifier(VERIFIER);
        f.manager.exchange_code(&good).await.unwrap();
    }

    #[tokio::test]
    async fn expired_code_rejected() {
        let f = fixture().await;
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();
        let url = f
            .manager
            .create_callback(
                &request.id,
                CallbackOutcome::Session {
                    session_id: session.id,
                    session_token: token,
                },
            )
            .await
            .unwrap();

        f.clock.advance(Duration::seconds(61));
        let exchange = TokenRequest::authorization_code("web", code_from(&url), "https://cb")
            .with_code_verifier(VERIFIER);
        assert!(matches!(
            f.manager.exchange_code(&exchange).await,
            Err(OidcError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_callbacks_have_one_winner() {
        let f = fixture().await;
        let (session, token) = f.sessions.create_session("user-1", "org-1", &[]).await;
        let request = f.manager.create(code_request(), Some("login-ui")).await.unwrap();
        f.manager.bind_session(&request.id, &session.id, "login-ui").await.unwrap();

        let manager = Arc::new(f.manager);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let id = request.id.clone();
            let outcome = CallbackOutcome::Session {
                session_id: session.id.clone(),
                session_token: token.clone(),
            };
            handles.push(tokio::spawn(async move { manager.create_callback(&id, outcome).await }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(err) => assert!(err.is_replay(), "unexpected error {err}"),
            }
        }
        assert_eq!(wins, 1);
    }
}
