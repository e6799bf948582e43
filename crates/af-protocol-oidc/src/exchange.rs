//! OAuth 2.0 Token Exchange (RFC 8693).
//!
//! Exchanges a subject token, optionally together with an actor token, for a
//! new token. With an actor token the result is an impersonation token: its
//! subject is the subject principal and its `act` claim names the actor.
//! Exchanged tokens never widen the subject's scope and are never refresh
//! tokens.

use std::sync::Arc;

use af_core::{AuditEvent, EventType};
use serde::{Deserialize, Serialize};

use crate::claims::ActorClaim;
use crate::client::{App, AppRegistry};
use crate::error::{OidcError, OidcResult};
use crate::permission::{ApiUsage, PermissionChecker};
use crate::request::TokenExchangeRequest;
use crate::token::{AuthContext, MintRequest, TokenInfo, TokenIssuer, TokenKind};
use crate::types::{GrantType, TokenTypeUri, join_scope};

/// Token exchange response (RFC 8693 Section 2.2.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeResponse {
    /// The issued token.
    pub access_token: String,
    /// Type of the issued token.
    pub issued_token_type: TokenTypeUri,
    /// `Bearer`, or `N_A` for tokens that are not access tokens.
    pub token_type: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Token exchange engine.
#[derive(Clone)]
pub struct TokenExchangeEngine {
    apps: Arc<dyn AppRegistry>,
    permissions: PermissionChecker,
    issuer: Arc<TokenIssuer>,
}

impl std::fmt::Debug for TokenExchangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeEngine")
            .field("issuer", &self.issuer.issuer())
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl TokenExchangeEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        apps: Arc<dyn AppRegistry>,
        permissions: PermissionChecker,
        issuer: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            apps,
            permissions,
            issuer,
        }
    }

    /// Performs a token exchange.
    ///
    /// # Errors
    ///
    /// - [`OidcError::FeatureDisabled`] if token exchange is off for the instance
    /// - [`OidcError::InvalidRequest`] for a `resource` parameter or a
    ///   `user_id` subject without actor token
    /// - [`OidcError::UnauthorizedClient`] if the client may not exchange tokens
    /// - [`OidcError::UnsupportedTokenType`] for refresh tokens as subject or
    ///   requested type and for unknown type URIs
    /// - [`OidcError::InvalidToken`] if a presented token does not resolve
    /// - [`OidcError::PermissionDenied`] if the actor may not impersonate the subject
    /// - [`OidcError::InvalidScope`] if none of the requested scope was granted
    /// - [`OidcError::InvalidTarget`] for unknown audiences
    pub async fn exchange(&self, request: &TokenExchangeRequest) -> OidcResult<TokenExchangeResponse> {
        if request.grant_type.parse::<GrantType>() != Ok(GrantType::TokenExchange) {
            return Err(OidcError::InvalidRequest(format!(
                "unsupported grant_type {}",
                request.grant_type
            )));
        }
        if !self.permissions.policy().token_exchange_enabled {
            return Err(OidcError::FeatureDisabled("token exchange"));
        }
        if !request.resource.is_empty() {
            return Err(OidcError::InvalidRequest(
                "resource parameter is not supported".to_string(),
            ));
        }

        let app = self
            .apps
            .get_app(&request.client_id)
            .await?
            .ok_or_else(|| OidcError::InvalidClient(format!("unknown client {}", request.client_id)))?;
        if !app.allows_grant(GrantType::TokenExchange) {
            return Err(OidcError::UnauthorizedClient(
                "token exchange grant not allowed".to_string(),
            ));
        }

        let requested_type = match request.requested_token_type.as_deref() {
            None => TokenTypeUri::AccessToken,
            Some(uri) => parse_type(uri)?,
        };
        if matches!(requested_type, TokenTypeUri::RefreshToken | TokenTypeUri::UserId) {
            return Err(OidcError::UnsupportedTokenType(format!(
                "{requested_type} cannot be requested"
            )));
        }

        let subject_type = parse_type(&request.subject_token_type)?;
        let actor = match (&request.actor_token, &request.actor_token_type) {
            (Some(token), Some(uri)) => Some(self.resolve_actor(token, parse_type(uri)?).await?),
            (Some(_), None) => {
                return Err(OidcError::InvalidRequest(
                    "actor_token_type is required with actor_token".to_string(),
                ));
            }
            (None, _) => None,
        };
        let subject = self
            .resolve_subject(&request.subject_token, subject_type, actor.as_ref())
            .await?;

        let actor_claim = match &actor {
            Some(actor) => {
                self.authorize_impersonation(&actor.subject, &subject.subject)
                    .await?;
                Some(
                    ActorClaim::new(self.issuer.issuer(), actor.subject.clone())
                        .with_prior(subject.actor.clone()),
                )
            }
            None => subject.actor.clone(),
        };

        let scope = narrow_scope(&subject.scope, &request.scopes())?;
        let audience = self.audience(request, &app).await?;

        let mint = MintRequest::new(
            subject.subject.clone(),
            request.client_id.clone(),
            subject.auth.clone(),
        )
        .with_scope(scope.clone())
        .with_audience(audience)
        .with_actor(actor_claim.clone())
        .with_access_format(app.access_token_format);

        let (issued, token_type) = match requested_type {
            TokenTypeUri::AccessToken => (
                self.issuer
                    .mint(TokenKind::access(app.access_token_format), &mint)
                    .await?,
                "Bearer",
            ),
            TokenTypeUri::Jwt => (self.issuer.mint(TokenKind::Jwt, &mint).await?, "Bearer"),
            TokenTypeUri::IdToken => (self.issuer.id_token(&mint, None)?, "N_A"),
            TokenTypeUri::RefreshToken | TokenTypeUri::UserId => {
                return Err(OidcError::UnsupportedTokenType(requested_type.to_string()));
            }
        };

        tracing::info!(
            subject = %subject.subject,
            actor = actor_claim.as_ref().map(|a| a.sub.as_str()),
            client_id = %request.client_id,
            issued_token_type = %requested_type,
            "token exchanged"
        );
        let mut event = AuditEvent::builder(EventType::TokenExchanged)
            .user(&subject.subject)
            .client(&request.client_id)
            .detail("issued_token_type", requested_type.as_uri());
        if let Some(actor) = &actor_claim {
            event = event.detail("actor", &actor.sub);
        }
        event.emit();

        Ok(TokenExchangeResponse {
            access_token: issued.token,
            issued_token_type: requested_type,
            token_type: token_type.to_string(),
            expires_in: issued.expires_in,
            scope: Some(join_scope(&scope)),
        })
    }

    async fn resolve_token(&self, token: &str, token_type: TokenTypeUri) -> OidcResult<TokenInfo> {
        match token_type {
            TokenTypeUri::AccessToken => self.issuer.resolve_access_token(token).await,
            TokenTypeUri::Jwt => {
                if token.split('.').count() != 3 {
                    return Err(OidcError::InvalidToken("not a JWT".to_string()));
                }
                self.issuer.resolve_access_token(token).await
            }
            TokenTypeUri::IdToken => self.issuer.resolve_id_token(token),
            TokenTypeUri::RefreshToken => Err(OidcError::UnsupportedTokenType(
                "refresh_token cannot be exchanged".to_string(),
            )),
            TokenTypeUri::UserId => Err(OidcError::UnsupportedTokenType(
                "user_id is only supported as subject token type".to_string(),
            )),
        }
    }

    async fn resolve_actor(&self, token: &str, token_type: TokenTypeUri) -> OidcResult<TokenInfo> {
        let info = self.resolve_token(token, token_type).await?;
        // an impersonation token cannot impersonate further
        self.permissions.can_use_api(info.actor.as_ref(), ApiUsage::Api)?;
        Ok(info)
    }

    async fn resolve_subject(
        &self,
        token: &str,
        token_type: TokenTypeUri,
        actor: Option<&TokenInfo>,
    ) -> OidcResult<TokenInfo> {
        if token_type != TokenTypeUri::UserId {
            return self.resolve_token(token, token_type).await;
        }

        let Some(actor) = actor else {
            return Err(OidcError::InvalidRequest(
                "user_id subject requires an actor token".to_string(),
            ));
        };
        let user = self
            .permissions
            .users()
            .get_user(token)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| OidcError::InvalidToken("subject user not found".to_string()))?;

        // the actor authenticated; the subject inherits its scope and context
        Ok(TokenInfo {
            subject: user.id,
            client_id: None,
            audience: Vec::new(),
            scope: actor.scope.clone(),
            actor: None,
            auth: AuthContext {
                session_id: None,
                ..actor.auth.clone()
            },
            expires_at: actor.expires_at,
        })
    }

    async fn authorize_impersonation(&self, actor_id: &str, subject_id: &str) -> OidcResult<()> {
        let subject_org = self
            .permissions
            .users()
            .get_user(subject_id)
            .await?
            .map(|user| user.resource_owner)
            .ok_or_else(|| OidcError::InvalidToken("subject user not found".to_string()))?;

        if !self.permissions.can_impersonate(actor_id, &subject_org).await? {
            tracing::warn!(actor = %actor_id, subject = %subject_id, "impersonation denied");
            AuditEvent::builder(EventType::TokenExchanged)
                .failure("Errors.TokenExchange.Token.NoImpersonationPermission")
                .user(subject_id)
                .detail("actor", actor_id)
                .emit();
            return Err(OidcError::PermissionDenied(
                "Errors.TokenExchange.Token.NoImpersonationPermission".to_string(),
            ));
        }
        Ok(())
    }

    /// Without an explicit audience the new token is for the requesting
    /// client and its project, never the subject token's audience.
    async fn audience(&self, request: &TokenExchangeRequest, app: &App) -> OidcResult<Vec<String>> {
        if request.audience.is_empty() {
            let mut audience = vec![app.project_id.clone()];
            if app.client_id != app.project_id {
                audience.push(app.client_id.clone());
            }
            return Ok(audience);
        }
        for audience in &request.audience {
            if !self.apps.is_known_audience(audience).await? {
                return Err(OidcError::InvalidTarget(format!("unknown audience {audience}")));
            }
        }
        Ok(request.audience.clone())
    }
}

fn parse_type(uri: &str) -> OidcResult<TokenTypeUri> {
    uri.parse().map_err(OidcError::UnsupportedTokenType)
}

/// Narrows `requested` to what was `authorized`.
///
/// An empty request keeps the authorized scope. Requested values outside the
/// authorized scope are dropped; if none remain the request fails.
fn narrow_scope(authorized: &[String], requested: &[String]) -> OidcResult<Vec<String>> {
    if requested.is_empty() {
        return Ok(authorized.to_vec());
    }
    let granted: Vec<String> = requested
        .iter()
        .filter(|s| authorized.contains(s))
        .cloned()
        .collect();
    if granted.is_empty() {
        return Err(OidcError::InvalidScope(
            "none of the requested scope was granted".to_string(),
        ));
    }
    Ok(granted)
}
