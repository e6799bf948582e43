//! Device authorization grant (RFC 8628).
//!
//! The device receives a high-entropy device code to poll with and a short
//! user code to show. The user enters the user code on a second screen, where
//! the login UI approves or denies the request with an authenticated session.
//! Polling only reads the record; the single consuming transition is the
//! successful poll after approval.

use std::collections::HashMap;
use std::sync::Arc;

use af_cache::{MemoryRecordStore, RecordStore, SingleUseTokens, TokenError};
use af_core::{AuditEvent, Clock, EventType, FlowConfig};
use af_crypto::random::{format_user_code, generate_user_code, normalize_user_code};
use af_session::SessionVerifier;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::client::{App, AppRegistry};
use crate::error::{OidcError, OidcResult};
use crate::permission::PermissionChecker;
use crate::request::{DeviceAuthorizationRequest, DeviceTokenRequest};
use crate::token::{AuthContext, MintRequest, TokenIssuer, TokenResponse, TokenSetOptions};
use crate::types::{GrantType, parse_scope, scopes};

const MAX_CAS_ATTEMPTS: usize = 8;
const MAX_USER_CODE_ATTEMPTS: usize = 5;

/// State of a device authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAuthState {
    /// Waiting for the user.
    Initiated,
    /// Approved, tokens not yet collected.
    Approved,
    /// Denied by the user.
    Denied,
    /// Tokens were issued to the device.
    Done,
}

/// A device authorization record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    /// Record id; the device code is bound to it.
    pub id: String,
    /// Requesting client.
    pub client_id: String,
    /// Normalized user code.
    pub user_code: String,
    /// Granted scope.
    pub scope: Vec<String>,
    /// Audience of the tokens.
    pub audience: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
    /// Minimum polling interval in seconds.
    pub interval: i64,
    /// State.
    pub status: DeviceAuthState,
    /// Approving user.
    pub user_id: Option<String>,
    /// Authentication context of the approving session.
    pub auth: Option<AuthContext>,
}

impl DeviceAuthorization {
    /// Returns whether the record is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Device authorization response (RFC 8628 Section 3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Code the device polls with.
    pub device_code: String,
    /// Code shown to the user.
    pub user_code: String,
    /// Where the user enters the code.
    pub verification_uri: String,
    /// Verification URI with the user code filled in.
    pub verification_uri_complete: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Minimum polling interval in seconds.
    pub interval: i64,
}

/// The user's decision on the second screen.
#[derive(Debug, Clone)]
pub enum DeviceDecision {
    /// Approve with an authenticated session.
    Approve {
        /// Session id.
        session_id: String,
        /// Session token proving possession.
        session_token: String,
    },
    /// Deny the request.
    Deny,
}

/// Result of a device poll.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Approved; tokens issued.
    Tokens(Box<TokenResponse>),
    /// The user has not decided yet.
    AuthorizationPending,
    /// The device polls too fast.
    SlowDown,
    /// The user denied the request.
    AccessDenied,
    /// The device code expired.
    Expired,
}

impl PollOutcome {
    /// RFC 8628 error code for non-token outcomes.
    #[must_use]
    pub const fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Tokens(_) => None,
            Self::AuthorizationPending => Some("authorization_pending"),
            Self::SlowDown => Some("slow_down"),
            Self::AccessDenied => Some("access_denied"),
            Self::Expired => Some("expired_token"),
        }
    }
}

/// Manages device authorizations.
pub struct DeviceAuthorizationManager {
    config: FlowConfig,
    apps: Arc<dyn AppRegistry>,
    sessions: Arc<dyn SessionVerifier>,
    permissions: PermissionChecker,
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    records: Arc<dyn RecordStore<DeviceAuthorization>>,
    device_codes: SingleUseTokens,
    last_polls: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for DeviceAuthorizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthorizationManager")
            .field("verification_uri", &self.config.device_verification_uri)
            .finish_non_exhaustive()
    }
}

impl DeviceAuthorizationManager {
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
            device_codes: SingleUseTokens::in_memory(clock.clone()),
            last_polls: Mutex::new(HashMap::new()),
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
        records: Arc<dyn RecordStore<DeviceAuthorization>>,
        device_codes: SingleUseTokens,
    ) -> Self {
        self.records = records;
        self.device_codes = device_codes;
        self
    }

    async fn app(&self, client_id: &str) -> OidcResult<App> {
        self.apps
            .get_app(client_id)
            .await?
            .ok_or_else(|| OidcError::InvalidClient(format!("unknown client {client_id}")))
    }

    /// Starts a device authorization.
    ///
    /// # Errors
    ///
    /// - [`OidcError::InvalidClient`] for unknown clients
    /// - [`OidcError::UnauthorizedClient`] if the client may not use the device grant
    pub async fn create(
        &self,
        request: &DeviceAuthorizationRequest,
    ) -> OidcResult<DeviceAuthorizationResponse> {
        let app = self.app(&request.client_id).await?;
        if !app.allows_grant(GrantType::DeviceCode) {
            return Err(OidcError::UnauthorizedClient(
                "device_code grant not allowed".to_string(),
            ));
        }

        let mut scope = request.scope.as_deref().map(parse_scope).unwrap_or_default();
        if !app.allows_grant(GrantType::RefreshToken) {
            scope.retain(|s| s != scopes::OFFLINE_ACCESS);
        }
        let mut audience = vec![app.project_id.clone()];
        if app.client_id != app.project_id {
            audience.push(app.client_id.clone());
        }

        let now = self.clock.now();
        let expires_at = now + Duration::seconds(self.config.device_code_lifespan);
        let id = Uuid::now_v7().to_string();
        let device_code = self
            .device_codes
            .issue(&id, expires_at)
            .await
            .map_err(|e| OidcError::Internal(e.to_string()))?;

        let mut record = DeviceAuthorization {
            id: id.clone(),
            client_id: app.client_id.clone(),
            user_code: String::new(),
            scope,
            audience,
            created_at: now,
            expires_at,
            interval: self.config.device_poll_interval,
            status: DeviceAuthState::Initiated,
            user_id: None,
            auth: None,
        };

        // user codes are short; retry on the rare alias collision
        let mut inserted = false;
        for _ in 0..MAX_USER_CODE_ATTEMPTS {
            record.user_code = generate_user_code(self.config.device_user_code_length);
            if self
                .records
                .insert(&id, &[record.user_code.clone()], record.clone())
                .await?
            {
                inserted = true;
                break;
            }
        }
        if !inserted {
            return Err(OidcError::Internal("user code space exhausted".to_string()));
        }

        let user_code = format_user_code(&record.user_code);
        tracing::info!(device_auth = %id, client_id = %record.client_id, "device authorization created");
        AuditEvent::builder(EventType::DeviceAuthCreated)
            .client(&record.client_id)
            .aggregate(&id)
            .emit();

        Ok(DeviceAuthorizationResponse {
            device_code,
            verification_uri_complete: format!(
                "{}?user_code={}",
                self.config.device_verification_uri,
                urlencoding::encode(&user_code)
            ),
            verification_uri: self.config.device_verification_uri.clone(),
            user_code,
            expires_in: self.config.device_code_lifespan,
            interval: record.interval,
        })
    }

    async fn get_live(&self, id: &str) -> OidcResult<af_cache::Versioned<DeviceAuthorization>> {
        let current = self
            .records
            .get(id)
            .await?
            .ok_or(OidcError::NotFound("device authorization"))?;
        if current.record.is_expired_at(self.clock.now()) {
            return Err(OidcError::Expired("device authorization"));
        }
        Ok(current)
    }

    /// Looks up a live device authorization by the code the user typed.
    ///
    /// Matching ignores case and separators.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::NotFound`] for unknown codes and
    /// [`OidcError::Expired`] past expiry.
    pub async fn get_by_user_code(&self, user_code: &str) -> OidcResult<DeviceAuthorization> {
        let normalized = normalize_user_code(user_code);
        let id = self
            .records
            .resolve_alias(&normalized)
            .await?
            .ok_or(OidcError::NotFound("device authorization"))?;
        Ok(self.get_live(&id).await?.record)
    }

    /// Records the user's decision.
    ///
    /// # Errors
    ///
    /// - [`OidcError::NotFound`] / [`OidcError::Expired`] for unknown or expired records
    /// - [`OidcError::AlreadyDecided`] if a decision was already made
    /// - [`OidcError::InvalidSession`] if the session token does not verify
    /// - [`OidcError::PermissionDenied`] if the user lacks access to the project
    pub async fn authorize_or_deny(&self, id: &str, decision: DeviceDecision) -> OidcResult<()> {
        let current = self.get_live(id).await?;
        if current.record.status != DeviceAuthState::Initiated {
            return Err(self.already_decided(&current.record));
        }

        let (next_status, approval) = match decision {
            DeviceDecision::Deny => (DeviceAuthState::Denied, None),
            DeviceDecision::Approve {
                session_id,
                session_token,
            } => {
                let session = self
                    .sessions
                    .verify_session_token(&session_id, &session_token)
                    .await?;
                let app = self.app(&current.record.client_id).await?;
                self.permissions
                    .check_user_grant(&app, &session.user_id, &session.resource_owner)
                    .await?;
                (
                    DeviceAuthState::Approved,
                    Some((session.user_id.clone(), AuthContext::from_session(&session))),
                )
            }
        };

        let mut decided = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_live(id).await?;
            if current.record.status != DeviceAuthState::Initiated {
                return Err(self.already_decided(&current.record));
            }
            let mut next = current.record.clone();
            next.status = next_status;
            if let Some((user_id, auth)) = &approval {
                next.user_id = Some(user_id.clone());
                next.auth = Some(auth.clone());
            }
            if self.records.replace(id, current.version, next.clone()).await? {
                decided = Some(next);
                break;
            }
        }
        let decided =
            decided.ok_or_else(|| OidcError::Internal("device authorization update contended".to_string()))?;

        self.last_polls.lock().await.remove(id);
        let event = if decided.status == DeviceAuthState::Approved {
            EventType::DeviceAuthApproved
        } else {
            EventType::DeviceAuthDenied
        };
        tracing::info!(device_auth = %id, decision = event.as_str(), "device authorization decided");
        let mut builder = AuditEvent::builder(event)
            .client(&decided.client_id)
            .aggregate(id);
        if let Some(user_id) = &decided.user_id {
            builder = builder.user(user_id);
        }
        builder.emit();
        Ok(())
    }

    fn already_decided(&self, record: &DeviceAuthorization) -> OidcError {
        tracing::warn!(device_auth = %record.id, status = ?record.status, "device authorization already decided");
        AuditEvent::builder(EventType::ReplayDetected)
            .failure("Errors.DeviceAuth.AlreadyDecided")
            .client(&record.client_id)
            .aggregate(&record.id)
            .emit();
        OidcError::AlreadyDecided
    }

    /// Polls with a device code.
    ///
    /// Pending, denied and expired states are reported as [`PollOutcome`]
    /// values. After approval, exactly one poll receives tokens.
    ///
    /// # Errors
    ///
    /// - [`OidcError::InvalidGrant`] for unknown device codes or a foreign client
    /// - [`OidcError::AlreadyConsumed`] if tokens were already issued
    pub async fn poll(&self, request: &DeviceTokenRequest) -> OidcResult<PollOutcome> {
        if request.grant_type.parse::<GrantType>() != Ok(GrantType::DeviceCode) {
            return Err(OidcError::InvalidRequest(format!(
                "unsupported grant_type {}",
                request.grant_type
            )));
        }

        let id = match self.device_codes.resolve(&request.device_code).await {
            Ok(id) => id,
            Err(TokenError::Expired) => return Ok(PollOutcome::Expired),
            Err(TokenError::Backend(e)) => return Err(e.into()),
            Err(TokenError::Invalid | TokenError::Consumed) => {
                return Err(OidcError::InvalidGrant("invalid device code".to_string()));
            }
        };
        let current = match self.get_live(&id).await {
            Ok(current) => current,
            Err(OidcError::Expired(_)) => {
                self.last_polls.lock().await.remove(&id);
                return Ok(PollOutcome::Expired);
            }
            Err(OidcError::NotFound(_)) => {
                return Err(OidcError::InvalidGrant("invalid device code".to_string()));
            }
            Err(other) => return Err(other),
        };
        if current.record.client_id != request.client_id {
            tracing::warn!(device_auth = %id, client_id = %request.client_id, "device code presented by foreign client");
            return Err(OidcError::InvalidGrant(
                "device code was issued to another client".to_string(),
            ));
        }

        match current.record.status {
            DeviceAuthState::Initiated => Ok(self.throttle(&current.record).await),
            DeviceAuthState::Denied => Ok(PollOutcome::AccessDenied),
            DeviceAuthState::Done => Err(self.replay(&current.record)),
            DeviceAuthState::Approved => {
                // mint first so a failure leaves the authorization approved
                let tokens = self.issue_tokens(&current.record).await?;
                let mut done = current.record.clone();
                done.status = DeviceAuthState::Done;
                if !self.records.replace(&id, current.version, done).await? {
                    // lost the race to a concurrent poll
                    return Err(self.replay(&current.record));
                }
                self.last_polls.lock().await.remove(&id);

                let record = &current.record;
                let user_id = record.user_id.as_deref().unwrap_or_default();
                tracing::info!(device_auth = %record.id, user_id = %user_id, "device tokens issued");
                AuditEvent::builder(EventType::DeviceTokenIssued)
                    .user(user_id)
                    .client(&record.client_id)
                    .aggregate(&record.id)
                    .emit();
                Ok(PollOutcome::Tokens(Box::new(tokens)))
            }
        }
    }

    async fn throttle(&self, record: &DeviceAuthorization) -> PollOutcome {
        let now = self.clock.now();
        let mut last_polls = self.last_polls.lock().await;
        // abandoned authorizations are never polled again; drop their entries
        // once no device code could still be live
        let lifespan = Duration::seconds(self.config.device_code_lifespan);
        last_polls.retain(|_, last| now < *last + lifespan);
        let too_fast = last_polls
            .get(&record.id)
            .is_some_and(|last| now < *last + Duration::seconds(record.interval));
        last_polls.insert(record.id.clone(), now);
        if too_fast {
            tracing::debug!(device_auth = %record.id, "device polling too fast");
            PollOutcome::SlowDown
        } else {
            PollOutcome::AuthorizationPending
        }
    }

    fn replay(&self, record: &DeviceAuthorization) -> OidcError {
        tracing::warn!(device_auth = %record.id, "device code already used");
        AuditEvent::builder(EventType::ReplayDetected)
            .failure("device code already used")
            .client(&record.client_id)
            .aggregate(&record.id)
            .emit();
        OidcError::AlreadyConsumed("device code")
    }

    async fn issue_tokens(&self, record: &DeviceAuthorization) -> OidcResult<TokenResponse> {
        let (Some(user_id), Some(auth)) = (&record.user_id, &record.auth) else {
            return Err(OidcError::Internal("approved device authorization without user".to_string()));
        };
        let app = self.app(&record.client_id).await?;
        let mint = MintRequest::new(user_id.clone(), record.client_id.clone(), auth.clone())
            .with_scope(record.scope.clone())
            .with_audience(record.audience.clone());
        let response = self
            .issuer
            .token_set(
                &mint,
                TokenSetOptions {
                    access_format: app.access_token_format,
                    id_token: true,
                    refresh_token: record.scope.iter().any(|s| s == scopes::OFFLINE_ACCESS)
                        && app.allows_grant(GrantType::RefreshToken),
                },
            )
            .await?;
        Ok(response)
    }
}
