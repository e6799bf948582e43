//! Identity provider configuration.
//!
//! An intent always names the provider it runs against. The provider kind
//! decides what `create` hands back to the browser: an OAuth/OIDC authorize
//! URL, a SAML AuthnRequest, or nothing for LDAP, which binds synchronously.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{IntentResult, LdapError, LdapResult};

/// A configured external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Protocol-specific settings.
    pub kind: IdpKind,
}

impl IdpConfig {
    /// Creates a provider configuration.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: IdpKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Protocol of an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdpKind {
    /// Plain OAuth 2.0 provider.
    OAuth(OAuthIdpConfig),
    /// OpenID Connect provider.
    Oidc(OAuthIdpConfig),
    /// SAML 2.0 provider.
    Saml(SamlIdpConfig),
    /// LDAP directory.
    Ldap(LdapIdpConfig),
}

impl IdpKind {
    /// Short protocol name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OAuth(_) => "oauth",
            Self::Oidc(_) => "oidc",
            Self::Saml(_) => "saml",
            Self::Ldap(_) => "ldap",
        }
    }
}

/// OAuth 2.0 / OIDC client settings at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthIdpConfig {
    /// Provider authorization endpoint.
    pub authorization_endpoint: String,
    /// Our client id at the provider.
    pub client_id: String,
    /// Scopes to request.
    pub scopes: Vec<String>,
}

impl OAuthIdpConfig {
    /// Creates OAuth settings.
    #[must_use]
    pub fn new(authorization_endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            client_id: client_id.into(),
            scopes: Vec::new(),
        }
    }

    /// Adds a scope to request.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }
}

/// SAML binding used to deliver the AuthnRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamlBinding {
    /// HTTP-Redirect: deflated request in the query string.
    #[default]
    Redirect,
    /// HTTP-POST: auto-submitted form.
    Post,
}

/// SAML service provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamlIdpConfig {
    /// Our entity id (the AuthnRequest issuer).
    pub entity_id: String,
    /// Provider single sign-on service URL.
    pub sso_url: String,
    /// Binding used to send the request.
    #[serde(default)]
    pub binding: SamlBinding,
}

/// LDAP directory settings.
///
/// Only `ldaps://` URLs are accepted; see [`LdapIdpConfig::validate`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapIdpConfig {
    /// Server URL (must be `ldaps://`).
    pub connection_url: String,
    /// Service account DN.
    pub bind_dn: String,
    /// Service account password.
    pub bind_credential: String,
    /// Base DN for user searches.
    pub users_dn: String,
    /// Attribute matched against the login name.
    pub username_attribute: String,
    /// Attribute holding the stable user id.
    pub uuid_attribute: String,
    /// Object class of user entries.
    pub user_object_class: String,
    /// Attributes returned with a successful login.
    pub attributes: Vec<String>,
}

impl std::fmt::Debug for LdapIdpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapIdpConfig")
            .field("connection_url", &self.connection_url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_credential", &"[REDACTED]")
            .field("users_dn", &self.users_dn)
            .field("username_attribute", &self.username_attribute)
            .finish_non_exhaustive()
    }
}

impl LdapIdpConfig {
    /// Creates settings with `uid`/`entryUUID`/`inetOrgPerson` defaults.
    #[must_use]
    pub fn new(
        connection_url: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_credential: impl Into<String>,
        users_dn: impl Into<String>,
    ) -> Self {
        Self {
            connection_url: connection_url.into(),
            bind_dn: bind_dn.into(),
            bind_credential: bind_credential.into(),
            users_dn: users_dn.into(),
            username_attribute: "uid".to_string(),
            uuid_attribute: "entryUUID".to_string(),
            user_object_class: "inetOrgPerson".to_string(),
            attributes: vec!["cn".to_string(), "mail".to_string()],
        }
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`LdapError::InsecureProtocol`] for anything but `ldaps://`,
    /// and a configuration error for an empty host or DN.
    pub fn validate(&self) -> LdapResult<()> {
        let url = self.connection_url.to_lowercase();
        let Some(host) = url.strip_prefix("ldaps://") else {
            return Err(LdapError::InsecureProtocol);
        };
        if host.is_empty() {
            return Err(LdapError::config("missing host in connection_url"));
        }
        if self.bind_dn.is_empty() {
            return Err(LdapError::config("bind_dn cannot be empty"));
        }
        if self.users_dn.is_empty() {
            return Err(LdapError::config("users_dn cannot be empty"));
        }
        Ok(())
    }

    /// Builds the search filter for a login name, escaping it.
    #[must_use]
    pub fn user_filter(&self, username: &str) -> String {
        format!(
            "(&(objectClass={})({}={}))",
            self.user_object_class,
            self.username_attribute,
            ldap3::ldap_escape(username)
        )
    }
}

/// Lookup of identity provider configurations.
#[async_trait]
pub trait IdpRegistry: Send + Sync {
    /// Returns the provider with `idp_id`.
    async fn get_idp(&self, idp_id: &str) -> IntentResult<Option<IdpConfig>>;
}

/// In-memory provider registry.
#[derive(Debug, Default)]
pub struct InMemoryIdpRegistry {
    idps: RwLock<HashMap<String, IdpConfig>>,
}

impl InMemoryIdpRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a provider.
    pub async fn register(&self, idp: IdpConfig) {
        self.idps.write().await.insert(idp.id.clone(), idp);
    }
}

#[async_trait]
impl IdpRegistry for InMemoryIdpRegistry {
    async fn get_idp(&self, idp_id: &str) -> IntentResult<Option<IdpConfig>> {
        Ok(self.idps.read().await.get(idp_id).cloned())
    }
}
