//! External identity provider intents.
//!
//! An intent is created before the browser leaves for an external provider
//! and is completed exactly once by the provider callback, either as
//! succeeded or failed. Completion hands out an opaque token bound to the
//! intent id; the client presents id and token to read the result once.
//! Provider access tokens, ID tokens and SAML assertions are stored
//! encrypted and only decrypted on that single read.
//!
//! LDAP has no browser round trip: [`IdpIntentManager::start_ldap`] creates
//! the intent, binds against the directory and completes it in one call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use af_cache::{MemoryRecordStore, RecordStore, SingleUseTokens, TokenError};
use af_core::{AuditEvent, Clock, EventType, FlowConfig};
use af_crypto::EncryptionKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::{IdpConfig, IdpKind, IdpRegistry, OAuthIdpConfig};
use crate::error::{IntentError, IntentResult, LdapError};
use crate::ldap::LdapAuthenticator;
use crate::saml::AuthnRequest;

const MAX_CAS_ATTEMPTS: usize = 8;

/// State of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    /// Waiting for the provider callback.
    Created,
    /// The provider authenticated the user.
    Succeeded,
    /// The provider login failed.
    Failed,
}

/// How the browser is sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizationDetails {
    /// Redirect the browser to this URL.
    Redirect {
        /// Target URL.
        url: String,
    },
    /// Auto-submit a form with these fields to `url`.
    PostForm {
        /// Form action.
        url: String,
        /// Form fields in submission order.
        fields: Vec<(String, String)>,
    },
}

/// The user as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpUser {
    /// User id at the provider.
    pub id: String,
    /// Preferred username at the provider.
    pub username: String,
    /// Provider payload as received.
    pub raw_information: serde_json::Value,
}

/// Credentials obtained from the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderCredentials {
    /// OAuth/OIDC tokens.
    OAuth {
        /// Provider access token.
        access_token: String,
        /// Provider ID token (OIDC only).
        id_token: Option<String>,
    },
    /// SAML assertion XML.
    Saml {
        /// The assertion.
        assertion: String,
    },
    /// Directory attributes of the bound entry.
    Ldap {
        /// Attribute values by name.
        attributes: HashMap<String, Vec<String>>,
    },
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OAuth { id_token, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"[REDACTED]")
                .field("id_token", &id_token.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            Self::Saml { .. } => f
                .debug_struct("Saml")
                .field("assertion", &"[REDACTED]")
                .finish(),
            Self::Ldap { attributes } => f
                .debug_struct("Ldap")
                .field("attributes", &attributes.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

impl ProviderCredentials {
    const fn matches(&self, kind: &IdpKind) -> bool {
        matches!(
            (self, kind),
            (Self::OAuth { .. }, IdpKind::OAuth(_) | IdpKind::Oidc(_))
                | (Self::Saml { .. }, IdpKind::Saml(_))
                | (Self::Ldap { .. }, IdpKind::Ldap(_))
        )
    }
}

/// Credentials as stored: secrets are AES-GCM sealed and base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SealedCredentials {
    OAuth {
        access_token: String,
        id_token: Option<String>,
    },
    Saml {
        assertion: String,
    },
    Ldap {
        attributes: HashMap<String, Vec<String>>,
    },
}

/// An intent record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdpIntent {
    /// Intent id; also the OAuth `state` and SAML `RelayState`.
    pub id: String,
    /// Provider the intent runs against.
    pub idp_id: String,
    /// Owning instance.
    pub instance_id: String,
    /// Local user the login is meant for, if known up front.
    pub user_id: Option<String>,
    /// Browser target after success.
    pub success_url: Option<String>,
    /// Browser target after failure.
    pub failure_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
    /// Current state.
    pub state: IntentState,
    /// Id of the SAML AuthnRequest sent for this intent.
    pub saml_request_id: Option<String>,
    /// Provider user, set on success.
    pub idp_user: Option<IdpUser>,
    /// Existing local user linked to the provider user.
    pub linked_user_id: Option<String>,
    /// Failure reason, set on failure.
    pub failure_reason: Option<String>,
    credentials: Option<SealedCredentials>,
}

impl IdpIntent {
    /// Returns whether the intent is past its lifetime at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Input for [`IdpIntentManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateIntent {
    /// Provider id.
    pub idp_id: String,
    /// Owning instance.
    pub instance_id: String,
    /// Browser target after success.
    pub success_url: String,
    /// Browser target after failure.
    pub failure_url: String,
    /// Local user the login is meant for.
    pub user_id: Option<String>,
}

impl CreateIntent {
    /// Creates the input for a browser-redirect intent.
    #[must_use]
    pub fn new(
        idp_id: impl Into<String>,
        instance_id: impl Into<String>,
        success_url: impl Into<String>,
        failure_url: impl Into<String>,
    ) -> Self {
        Self {
            idp_id: idp_id.into(),
            instance_id: instance_id.into(),
            success_url: success_url.into(),
            failure_url: failure_url.into(),
            user_id: None,
        }
    }

    /// Pins the intent to a local user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Result of [`IdpIntentManager::create`].
#[derive(Debug, Clone)]
pub struct IntentStart {
    /// The new intent.
    pub intent: IdpIntent,
    /// What to send to the browser.
    pub details: AuthorizationDetails,
}

/// Result of a provider login.
#[derive(Debug, Clone)]
pub struct IntentSuccess {
    /// Provider user.
    pub idp_user: IdpUser,
    /// Existing local user matched to the provider user.
    pub linked_user_id: Option<String>,
    /// Provider credentials.
    pub credentials: ProviderCredentials,
}

/// A completed intent, ready to hand to the client.
#[derive(Clone)]
pub struct IntentCompletion {
    /// Intent id.
    pub intent_id: String,
    /// Single-use token for [`IdpIntentManager::retrieve`].
    pub token: String,
    /// Success or failure URL with `id` and `token` appended, if the intent
    /// has browser targets.
    pub redirect: Option<String>,
}

impl std::fmt::Debug for IntentCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentCompletion")
            .field("intent_id", &self.intent_id)
            .finish_non_exhaustive()
    }
}

/// Result of [`IdpIntentManager::retrieve`].
#[derive(Debug, Clone)]
pub struct RetrievedIntent {
    /// Intent id.
    pub intent_id: String,
    /// Provider id.
    pub idp_id: String,
    /// Owning instance.
    pub instance_id: String,
    /// Local user the login was meant for.
    pub user_id: Option<String>,
    /// Provider user.
    pub idp_user: IdpUser,
    /// Linked local user.
    pub linked_user_id: Option<String>,
    /// Decrypted provider credentials.
    pub credentials: ProviderCredentials,
}

/// Credentials for [`IdpIntentManager::start_ldap`].
#[derive(Clone)]
pub struct LdapLogin {
    /// LDAP provider id.
    pub idp_id: String,
    /// Owning instance.
    pub instance_id: String,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for LdapLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapLogin")
            .field("idp_id", &self.idp_id)
            .field("instance_id", &self.instance_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Owns the lifecycle of IDP intents.
pub struct IdpIntentManager {
    config: FlowConfig,
    idps: Arc<dyn IdpRegistry>,
    ldap: Arc<dyn LdapAuthenticator>,
    records: Arc<dyn RecordStore<IdpIntent>>,
    tokens: SingleUseTokens,
    key: EncryptionKey,
    clock: Arc<dyn Clock>,
    ldap_timeout: StdDuration,
}

impl std::fmt::Debug for IdpIntentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpIntentManager")
            .field("callback_url", &self.config.idp_callback_url)
            .field("ldap_timeout", &self.ldap_timeout)
            .finish_non_exhaustive()
    }
}

impl IdpIntentManager {
    /// Creates a manager with in-memory storage.
    #[must_use]
    pub fn new(
        config: FlowConfig,
        idps: Arc<dyn IdpRegistry>,
        ldap: Arc<dyn LdapAuthenticator>,
        key: EncryptionKey,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ldap_timeout: StdDuration::from_secs(config.ldap_timeout),
            records: Arc::new(MemoryRecordStore::new()),
            tokens: SingleUseTokens::in_memory(clock.clone()),
            config,
            idps,
            ldap,
            key,
            clock,
        }
    }

    /// Replaces the storage.
    #[must_use]
    pub fn with_storage(
        mut self,
        records: Arc<dyn RecordStore<IdpIntent>>,
        tokens: SingleUseTokens,
    ) -> Self {
        self.records = records;
        self.tokens = tokens;
        self
    }

    /// Overrides the LDAP bind timeout from the configuration.
    #[must_use]
    pub const fn with_ldap_timeout(mut self, timeout: StdDuration) -> Self {
        self.ldap_timeout = timeout;
        self
    }

    async fn idp(&self, idp_id: &str) -> IntentResult<IdpConfig> {
        self.idps
            .get_idp(idp_id)
            .await?
            .ok_or(IntentError::NotFound("identity provider"))
    }

    fn new_intent(
        &self,
        idp_id: &str,
        instance_id: &str,
        user_id: Option<String>,
        urls: Option<(String, String)>,
    ) -> IdpIntent {
        let now = self.clock.now();
        let (success_url, failure_url) = urls.unzip();
        IdpIntent {
            id: Uuid::now_v7().to_string(),
            idp_id: idp_id.to_string(),
            instance_id: instance_id.to_string(),
            user_id,
            success_url,
            failure_url,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.idp_intent_lifespan),
            state: IntentState::Created,
            saml_request_id: None,
            idp_user: None,
            linked_user_id: None,
            failure_reason: None,
            credentials: None,
        }
    }

    async fn store(&self, intent: &IdpIntent, idp: &IdpConfig) -> IntentResult<()> {
        if !self.records.insert(&intent.id, &[], intent.clone()).await? {
            return Err(IntentError::Internal("intent id collision".to_string()));
        }
        tracing::info!(intent = %intent.id, idp = %idp.id, kind = idp.kind.as_str(), "intent created");
        AuditEvent::builder(EventType::IntentCreated)
            .instance(&intent.instance_id)
            .aggregate(&intent.id)
            .detail("idp", &idp.id)
            .detail("kind", idp.kind.as_str())
            .emit();
        Ok(())
    }

    /// Creates an intent for a browser-redirect provider.
    ///
    /// Returns the authorize URL for OAuth/OIDC providers and the encoded
    /// AuthnRequest for SAML providers, both carrying the intent id as state.
    ///
    /// # Errors
    ///
    /// - [`IntentError::InvalidArgument`] for a missing provider id, missing
    ///   or malformed success/failure URLs, or an LDAP provider
    /// - [`IntentError::NotFound`] for an unknown provider
    pub async fn create(&self, request: CreateIntent) -> IntentResult<IntentStart> {
        if request.idp_id.is_empty() {
            return Err(IntentError::InvalidArgument("Errors.Intent.IDPMissing"));
        }
        let success_url = parse_target(&request.success_url, "Errors.Intent.SuccessURLMissing")?;
        let failure_url = parse_target(&request.failure_url, "Errors.Intent.FailureURLMissing")?;
        let idp = self.idp(&request.idp_id).await?;

        let mut intent = self.new_intent(
            &idp.id,
            &request.instance_id,
            request.user_id,
            Some((success_url, failure_url)),
        );
        let details = match &idp.kind {
            IdpKind::OAuth(oauth) => self.authorize_url(oauth, &intent.id, false)?,
            IdpKind::Oidc(oauth) => self.authorize_url(oauth, &intent.id, true)?,
            IdpKind::Saml(saml) => {
                let authn = AuthnRequest::new(saml, &self.config.idp_callback_url, intent.created_at);
                let details = authn.encode(saml.binding, &intent.id)?;
                intent.saml_request_id = Some(authn.id);
                details
            }
            IdpKind::Ldap(_) => {
                return Err(IntentError::InvalidArgument("Errors.Intent.IDPTypeLDAP"));
            }
        };

        self.store(&intent, &idp).await?;
        Ok(IntentStart { intent, details })
    }

    fn authorize_url(
        &self,
        oauth: &OAuthIdpConfig,
        state: &str,
        openid: bool,
    ) -> IntentResult<AuthorizationDetails> {
        let mut url = Url::parse(&oauth.authorization_endpoint)
            .map_err(|e| IntentError::Internal(format!("authorization endpoint: {e}")))?;
        let mut scopes = oauth.scopes.clone();
        if openid && !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }
        url.query_pairs_mut()
            .append_pair("client_id", &oauth.client_id)
            .append_pair("redirect_uri", &self.config.idp_callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        Ok(AuthorizationDetails::Redirect {
            url: url.to_string(),
        })
    }

    /// Returns an intent that is still within its lifetime.
    ///
    /// # Errors
    ///
    /// [`IntentError::NotFound`] for unknown ids, [`IntentError::Expired`]
    /// past the lifetime.
    pub async fn get(&self, id: &str) -> IntentResult<IdpIntent> {
        let intent = self
            .records
            .get(id)
            .await?
            .ok_or(IntentError::NotFound("intent"))?
            .record;
        if intent.is_expired_at(self.clock.now()) {
            return Err(IntentError::Expired);
        }
        Ok(intent)
    }

    async fn transition<F>(&self, id: &str, mut apply: F) -> IntentResult<IdpIntent>
    where
        F: FnMut(&IdpIntent) -> IntentResult<IdpIntent>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .records
                .get(id)
                .await?
                .ok_or(IntentError::NotFound("intent"))?;
            let next = apply(&current.record)?;
            if self.records.replace(id, current.version, next.clone()).await? {
                return Ok(next);
            }
        }
        Err(IntentError::Internal("intent update contended".to_string()))
    }

    fn replay(&self, intent_id: &str, operation: &str, err: IntentError) -> IntentError {
        tracing::warn!(intent = %intent_id, operation, "intent replay rejected");
        AuditEvent::builder(EventType::ReplayDetected)
            .failure(err.to_string())
            .aggregate(intent_id)
            .detail("operation", operation)
            .emit();
        err
    }

    /// Moves a created intent to a terminal state and issues its token.
    async fn complete<F>(
        &self,
        id: &str,
        operation: &str,
        mut finish: F,
    ) -> IntentResult<(IdpIntent, String)>
    where
        F: FnMut(&mut IdpIntent),
    {
        let now = self.clock.now();
        let current = self
            .records
            .get(id)
            .await?
            .ok_or(IntentError::NotFound("intent"))?
            .record;
        if current.is_expired_at(now) {
            return Err(IntentError::Expired);
        }
        if current.state != IntentState::Created {
            return Err(self.replay(id, operation, IntentError::AlreadyTerminal));
        }
        // the token exists before the intent turns terminal; a losing racer's
        // token is never published and expires with the intent
        let token = self.tokens.issue(id, current.expires_at).await?;

        let intent = self
            .transition(id, |intent| {
                if intent.is_expired_at(now) {
                    return Err(IntentError::Expired);
                }
                if intent.state != IntentState::Created {
                    return Err(IntentError::AlreadyTerminal);
                }
                let mut next = intent.clone();
                finish(&mut next);
                Ok(next)
            })
            .await
            .map_err(|e| match e {
                IntentError::AlreadyTerminal => self.replay(id, operation, e),
                other => other,
            })?;
        Ok((intent, token))
    }

    fn redirect(base: Option<&str>, id: &str, token: &str) -> IntentResult<Option<String>> {
        let Some(base) = base else {
            return Ok(None);
        };
        let mut url = Url::parse(base).map_err(|e| IntentError::Internal(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("id", id)
            .append_pair("token", token);
        Ok(Some(url.to_string()))
    }

    /// Completes an intent after a successful provider login.
    ///
    /// # Errors
    ///
    /// - [`IntentError::NotFound`] / [`IntentError::Expired`]
    /// - [`IntentError::InvalidArgument`] if the credentials do not fit the
    ///   provider protocol
    /// - [`IntentError::AlreadyTerminal`] if the intent already completed
    pub async fn succeed(&self, id: &str, success: IntentSuccess) -> IntentResult<IntentCompletion> {
        let current = self.get(id).await?;
        let idp = self.idp(&current.idp_id).await?;
        if !success.credentials.matches(&idp.kind) {
            return Err(IntentError::InvalidArgument("Errors.Intent.CredentialsMismatch"));
        }
        let sealed = self.seal(&success.credentials)?;

        let (intent, token) = self
            .complete(id, "succeed", |intent| {
                intent.state = IntentState::Succeeded;
                intent.idp_user = Some(success.idp_user.clone());
                intent.linked_user_id.clone_from(&success.linked_user_id);
                intent.credentials = Some(sealed.clone());
            })
            .await?;

        tracing::info!(intent = %id, idp = %intent.idp_id, "intent succeeded");
        let mut event = AuditEvent::builder(EventType::IntentSucceeded)
            .instance(&intent.instance_id)
            .aggregate(id)
            .detail("idp", &intent.idp_id);
        if let Some(user) = intent.linked_user_id.as_ref().or(intent.user_id.as_ref()) {
            event = event.user(user);
        }
        event.emit();

        Ok(IntentCompletion {
            intent_id: intent.id.clone(),
            redirect: Self::redirect(intent.success_url.as_deref(), id, &token)?,
            token,
        })
    }

    /// Completes an intent after a failed provider login.
    ///
    /// The returned token lets the client learn that the intent failed;
    /// retrieving with it yields [`IntentError::NotSucceeded`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::succeed`], without the credential check.
    pub async fn fail(&self, id: &str, reason: &str) -> IntentResult<IntentCompletion> {
        let (intent, token) = self
            .complete(id, "fail", |intent| {
                intent.state = IntentState::Failed;
                intent.failure_reason = Some(reason.to_string());
            })
            .await?;

        tracing::info!(intent = %id, idp = %intent.idp_id, reason, "intent failed");
        AuditEvent::builder(EventType::IntentFailed)
            .failure(reason)
            .instance(&intent.instance_id)
            .aggregate(id)
            .detail("idp", &intent.idp_id)
            .emit();

        Ok(IntentCompletion {
            intent_id: intent.id.clone(),
            redirect: Self::redirect(intent.failure_url.as_deref(), id, &token)?,
            token,
        })
    }

    /// Reads the result of a succeeded intent, once.
    ///
    /// # Errors
    ///
    /// - [`IntentError::NotFound`] for unknown ids
    /// - [`IntentError::InvalidToken`] if `token` was not issued for `id`
    /// - [`IntentError::Expired`] past the lifetime
    /// - [`IntentError::NotSucceeded`] if the intent did not succeed
    /// - [`IntentError::AlreadyConsumed`] on the second read
    pub async fn retrieve(&self, id: &str, token: &str) -> IntentResult<RetrievedIntent> {
        let intent = self
            .records
            .get(id)
            .await?
            .ok_or(IntentError::NotFound("intent"))?
            .record;
        self.tokens
            .verify_binding(token, id)
            .map_err(|_| IntentError::InvalidToken)?;
        if intent.is_expired_at(self.clock.now()) {
            return Err(IntentError::Expired);
        }
        if intent.state != IntentState::Succeeded {
            return Err(IntentError::NotSucceeded);
        }

        match self.tokens.redeem(token, id).await {
            Ok(()) => {}
            Err(TokenError::Consumed) => {
                return Err(self.replay(id, "retrieve", IntentError::AlreadyConsumed));
            }
            Err(e) => return Err(e.into()),
        }

        let (Some(idp_user), Some(sealed)) = (intent.idp_user, intent.credentials.as_ref()) else {
            return Err(IntentError::Internal("succeeded intent without result".to_string()));
        };
        let credentials = self.unseal(sealed)?;

        tracing::info!(intent = %id, "intent retrieved");
        AuditEvent::builder(EventType::IntentRetrieved)
            .instance(&intent.instance_id)
            .aggregate(id)
            .detail("idp", &intent.idp_id)
            .emit();

        Ok(RetrievedIntent {
            intent_id: intent.id,
            idp_id: intent.idp_id,
            instance_id: intent.instance_id,
            user_id: intent.user_id,
            idp_user,
            linked_user_id: intent.linked_user_id,
            credentials,
        })
    }

    /// Logs in against an LDAP provider and completes the intent in one go.
    ///
    /// The bind runs under the LDAP timeout. Rejected logins fail the intent
    /// and return [`IntentError::InvalidCredentials`] whether the user is
    /// unknown or the password is wrong.
    ///
    /// # Errors
    ///
    /// - [`IntentError::InvalidArgument`] for missing input or a non-LDAP provider
    /// - [`IntentError::NotFound`] for an unknown provider
    /// - [`IntentError::InvalidCredentials`] for rejected logins
    /// - [`IntentError::Unavailable`] on timeout or directory errors
    pub async fn start_ldap(&self, login: LdapLogin) -> IntentResult<IntentCompletion> {
        if login.idp_id.is_empty() {
            return Err(IntentError::InvalidArgument("Errors.Intent.IDPMissing"));
        }
        if login.username.is_empty() || login.password.is_empty() {
            return Err(IntentError::InvalidArgument("Errors.Intent.LDAPCredentialsMissing"));
        }
        let idp = self.idp(&login.idp_id).await?;
        let IdpKind::Ldap(ldap_config) = &idp.kind else {
            return Err(IntentError::InvalidArgument("Errors.Intent.IDPNotLDAP"));
        };

        let intent = self.new_intent(&idp.id, &login.instance_id, None, None);
        self.store(&intent, &idp).await?;

        let bind = self
            .ldap
            .authenticate(ldap_config, &login.username, &login.password);
        let err = match tokio::time::timeout(self.ldap_timeout, bind).await {
            Ok(Ok(identity)) => {
                let idp_user = IdpUser {
                    raw_information: serde_json::json!({
                        "dn": identity.dn,
                        "attributes": identity.attributes,
                    }),
                    id: identity.user_id,
                    username: identity.username,
                };
                let success = IntentSuccess {
                    idp_user,
                    linked_user_id: None,
                    credentials: ProviderCredentials::Ldap {
                        attributes: identity.attributes,
                    },
                };
                return self.succeed(&intent.id, success).await;
            }
            Ok(Err(LdapError::InvalidCredentials)) => IntentError::InvalidCredentials,
            Ok(Err(e @ (LdapError::Configuration(_) | LdapError::InsecureProtocol))) => {
                tracing::error!(idp = %idp.id, error = %e, "LDAP provider misconfigured");
                IntentError::Internal("LDAP provider misconfigured".to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!(idp = %idp.id, error = %e, "LDAP directory error");
                IntentError::Unavailable("directory error".to_string())
            }
            Err(_) => {
                tracing::warn!(idp = %idp.id, timeout = ?self.ldap_timeout, "LDAP bind timed out");
                IntentError::Unavailable("LDAP bind timed out".to_string())
            }
        };
        self.fail(&intent.id, &err.to_string()).await?;
        Err(err)
    }

    fn seal(&self, credentials: &ProviderCredentials) -> IntentResult<SealedCredentials> {
        Ok(match credentials {
            ProviderCredentials::OAuth {
                access_token,
                id_token,
            } => SealedCredentials::OAuth {
                access_token: self.key.encrypt_string(access_token)?,
                id_token: id_token
                    .as_deref()
                    .map(|t| self.key.encrypt_string(t))
                    .transpose()?,
            },
            ProviderCredentials::Saml { assertion } => SealedCredentials::Saml {
                assertion: self.key.encrypt_string(assertion)?,
            },
            ProviderCredentials::Ldap { attributes } => SealedCredentials::Ldap {
                attributes: attributes.clone(),
            },
        })
    }

    fn unseal(&self, sealed: &SealedCredentials) -> IntentResult<ProviderCredentials> {
        Ok(match sealed {
            SealedCredentials::OAuth {
                access_token,
                id_token,
            } => ProviderCredentials::OAuth {
                access_token: self.key.decrypt_string(access_token)?,
                id_token: id_token
                    .as_deref()
                    .map(|t| self.key.decrypt_string(t))
                    .transpose()?,
            },
            SealedCredentials::Saml { assertion } => ProviderCredentials::Saml {
                assertion: self.key.decrypt_string(assertion)?,
            },
            SealedCredentials::Ldap { attributes } => ProviderCredentials::Ldap {
                attributes: attributes.clone(),
            },
        })
    }
}

fn parse_target(url: &str, missing: &'static str) -> IntentResult<String> {
    if url.is_empty() {
        return Err(IntentError::InvalidArgument(missing));
    }
    Url::parse(url).map_err(|_| IntentError::InvalidArgument("Errors.Intent.InvalidURL"))?;
    Ok(url.to_string())
}
