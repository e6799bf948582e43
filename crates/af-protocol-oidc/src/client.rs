//! Client application registry.
//!
//! The flows read client configuration through [`AppRegistry`]; nothing here
//! is mutated by a flow.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{OidcError, OidcResult};
use crate::types::{GrantType, ResponseType, ResponseTypes};

/// Format of access tokens issued to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTokenFormat {
    /// Random opaque token, resolved by introspection.
    #[default]
    Opaque,
    /// Signed JWT.
    Jwt,
}

/// Which login UI serves the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "version")]
pub enum LoginVersion {
    /// Built-in login pages under the issuer.
    #[default]
    V1,
    /// External login UI at `base_uri`.
    V2 {
        /// Base URI of the login UI.
        base_uri: String,
    },
}

/// A registered redirect URI.
#[derive(Debug, Clone)]
pub enum RedirectPattern {
    /// Must match byte for byte.
    Exact(String),
    /// `*` matches any run of characters except `/`, `?` and `#`.
    Glob {
        /// Pattern as registered.
        pattern: String,
        /// Compiled, anchored matcher.
        regex: Regex,
    },
}

impl RedirectPattern {
    /// Parses a registered URI; any `*` makes it a glob.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::InvalidRequest`] if the glob cannot be compiled.
    pub fn parse(uri: &str) -> OidcResult<Self> {
        if !uri.contains('*') {
            return Ok(Self::Exact(uri.to_string()));
        }
        let body = uri
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^/?#]*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|e| OidcError::InvalidRequest(format!("invalid redirect pattern: {e}")))?;
        Ok(Self::Glob {
            pattern: uri.to_string(),
            regex,
        })
    }

    /// Checks whether `uri` matches.
    #[must_use]
    pub fn matches(&self, uri: &str) -> bool {
        match self {
            Self::Exact(registered) => registered == uri,
            Self::Glob { regex, .. } => regex.is_match(uri),
        }
    }
}

/// An OIDC application as configured by an administrator.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct App {
    /// OAuth `client_id`.
    pub client_id: String,
    /// Project the app belongs to.
    pub project_id: String,
    /// Organization owning the project.
    pub resource_owner: String,
    /// Registered redirect URIs.
    pub redirect_uris: Vec<RedirectPattern>,
    /// Allowed grant types.
    pub grant_types: HashSet<GrantType>,
    /// Allowed response types.
    pub response_types: HashSet<ResponseType>,
    /// Login UI serving this app.
    pub login_version: LoginVersion,
    /// Users need a grant on the project.
    pub project_role_check: bool,
    /// The user's organization needs access to the project.
    pub has_project_check: bool,
    /// Authorization requests must carry a PKCE challenge.
    pub pkce_required: bool,
    /// Access token format.
    pub access_token_format: AccessTokenFormat,
}

impl App {
    /// Creates an app allowing the authorization code flow only.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        project_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            project_id: project_id.into(),
            resource_owner: resource_owner.into(),
            redirect_uris: Vec::new(),
            grant_types: HashSet::from([GrantType::AuthorizationCode]),
            response_types: HashSet::from([ResponseType::Code]),
            login_version: LoginVersion::default(),
            project_role_check: false,
            has_project_check: false,
            pkce_required: false,
            access_token_format: AccessTokenFormat::default(),
        }
    }

    /// Registers a redirect URI (exact or glob).
    ///
    /// # Errors
    ///
    /// Returns an error if a glob pattern is malformed.
    pub fn with_redirect_uri(mut self, uri: &str) -> OidcResult<Self> {
        self.redirect_uris.push(RedirectPattern::parse(uri)?);
        Ok(self)
    }

    /// Allows a grant type.
    #[must_use]
    pub fn with_grant_type(mut self, grant_type: GrantType) -> Self {
        self.grant_types.insert(grant_type);
        self
    }

    /// Allows a response type.
    #[must_use]
    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_types.insert(response_type);
        self
    }

    /// Sets the login UI.
    #[must_use]
    pub fn with_login_version(mut self, login_version: LoginVersion) -> Self {
        self.login_version = login_version;
        self
    }

    /// Sets the project checks.
    #[must_use]
    pub const fn with_project_checks(mut self, role_check: bool, has_project_check: bool) -> Self {
        self.project_role_check = role_check;
        self.has_project_check = has_project_check;
        self
    }

    /// Requires PKCE.
    #[must_use]
    pub const fn with_pkce_required(mut self) -> Self {
        self.pkce_required = true;
        self
    }

    /// Sets the access token format.
    #[must_use]
    pub const fn with_access_token_format(mut self, format: AccessTokenFormat) -> Self {
        self.access_token_format = format;
        self
    }

    /// Checks a redirect URI against the registered set.
    #[must_use]
    pub fn is_redirect_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|p| p.matches(uri))
    }

    /// Checks whether the app may use a grant type.
    #[must_use]
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Checks that every requested response type is allowed, together with
    /// the grant type it implies.
    #[must_use]
    pub fn allows_response_types(&self, requested: &ResponseTypes) -> bool {
        requested.0.iter().all(|rt| self.response_types.contains(rt))
            && (!requested.contains(ResponseType::Code) || self.allows_grant(GrantType::AuthorizationCode))
            && (requested.is_code_flow() || self.allows_grant(GrantType::Implicit))
    }
}

/// Read access to application configuration.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Looks up an app by client id.
    async fn get_app(&self, client_id: &str) -> OidcResult<Option<App>>;

    /// Returns whether `audience` names a known app (client id) or project.
    async fn is_known_audience(&self, audience: &str) -> OidcResult<bool>;
}

/// In-memory app registry.
#[derive(Debug, Default)]
pub struct InMemoryAppRegistry {
    apps: RwLock<HashMap<String, App>>,
}

impl InMemoryAppRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces an app.
    pub async fn register(&self, app: App) {
        self.apps.write().await.insert(app.client_id.clone(), app);
    }
}

#[async_trait]
impl AppRegistry for InMemoryAppRegistry {
    async fn get_app(&self, client_id: &str) -> OidcResult<Option<App>> {
        Ok(self.apps.read().await.get(client_id).cloned())
    }

    async fn is_known_audience(&self, audience: &str) -> OidcResult<bool> {
        let apps = self.apps.read().await;
        Ok(apps.contains_key(audience) || apps.values().any(|app| app.project_id == audience))
    }
}
