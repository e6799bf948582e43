//! LDAP bind authentication.
//!
//! A login is a service-account bind, a search for exactly one entry
//! matching the escaped login name, and a bind as that entry with the user's
//! password. Unknown users, ambiguous matches and wrong passwords all surface
//! as [`LdapError::InvalidCredentials`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::LdapIdpConfig;
use crate::error::{LdapError, LdapResult};

const RC_INVALID_CREDENTIALS: u32 = 49;

/// A directory user after a successful bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapIdentity {
    /// Entry DN.
    pub dn: String,
    /// Stable id from the uuid attribute, or the DN if absent.
    pub user_id: String,
    /// Login name as stored in the directory.
    pub username: String,
    /// Returned attributes.
    pub attributes: HashMap<String, Vec<String>>,
}

/// Verifies a login against a directory.
#[async_trait]
pub trait LdapAuthenticator: Send + Sync {
    /// Authenticates `username` with `password`.
    ///
    /// # Errors
    ///
    /// [`LdapError::InvalidCredentials`] for any rejected login; other
    /// variants for configuration or connectivity problems.
    async fn authenticate(
        &self,
        config: &LdapIdpConfig,
        username: &str,
        password: &str,
    ) -> LdapResult<LdapIdentity>;
}

/// [`LdapAuthenticator`] over an `ldap3` LDAPS connection per login.
#[derive(Debug, Clone)]
pub struct Ldap3Authenticator {
    connect_timeout: Duration,
}

impl Default for Ldap3Authenticator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Ldap3Authenticator {
    /// Creates an authenticator with the given connect timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, config: &LdapIdpConfig) -> LdapResult<Ldap> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &config.connection_url)
            .await
            .map_err(|e| LdapError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(error = %e, "LDAP connection driver error");
            }
        });
        Ok(ldap)
    }

    async fn login(
        ldap: &mut Ldap,
        config: &LdapIdpConfig,
        username: &str,
        password: &str,
    ) -> LdapResult<LdapIdentity> {
        ldap.simple_bind(&config.bind_dn, &config.bind_credential)
            .await
            .map_err(|e| LdapError::Bind(e.to_string()))?
            .success()
            .map_err(|e| LdapError::Bind(e.to_string()))?;

        let mut attrs: Vec<&str> = config.attributes.iter().map(String::as_str).collect();
        attrs.push(&config.uuid_attribute);
        attrs.push(&config.username_attribute);
        let (entries, _) = ldap
            .search(
                &config.users_dn,
                Scope::Subtree,
                &config.user_filter(username),
                attrs,
            )
            .await
            .map_err(|e| LdapError::Search(e.to_string()))?
            .success()
            .map_err(|e| LdapError::Search(e.to_string()))?;

        let mut entries = entries.into_iter();
        let (Some(entry), None) = (entries.next(), entries.next()) else {
            tracing::debug!("LDAP user search did not yield exactly one entry");
            return Err(LdapError::InvalidCredentials);
        };
        let entry = SearchEntry::construct(entry);

        let result = ldap
            .simple_bind(&entry.dn, password)
            .await
            .map_err(|e| LdapError::Bind(e.to_string()))?;
        if result.rc == RC_INVALID_CREDENTIALS {
            return Err(LdapError::InvalidCredentials);
        }
        result
            .success()
            .map_err(|e| LdapError::Bind(e.to_string()))?;

        Ok(identity_from_entry(entry, config, username))
    }
}

fn first_value(attrs: &HashMap<String, Vec<String>>, name: &str) -> Option<String> {
    attrs.get(name).and_then(|values| values.first()).cloned()
}

fn identity_from_entry(entry: SearchEntry, config: &LdapIdpConfig, username: &str) -> LdapIdentity {
    let user_id = first_value(&entry.attrs, &config.uuid_attribute).unwrap_or_else(|| entry.dn.clone());
    let username = first_value(&entry.attrs, &config.username_attribute)
        .unwrap_or_else(|| username.to_string());
    LdapIdentity {
        dn: entry.dn,
        user_id,
        username,
        attributes: entry.attrs,
    }
}

#[async_trait]
impl LdapAuthenticator for Ldap3Authenticator {
    async fn authenticate(
        &self,
        config: &LdapIdpConfig,
        username: &str,
        password: &str,
    ) -> LdapResult<LdapIdentity> {
        config.validate()?;
        // An empty password turns a simple bind into an unauthenticated bind.
        if username.is_empty() || password.is_empty() {
            return Err(LdapError::InvalidCredentials);
        }

        let mut ldap = self.connect(config).await?;
        let result = Self::login(&mut ldap, config, username, password).await;
        if let Err(e) = ldap.unbind().await {
            tracing::debug!(error = %e, "LDAP unbind failed");
        }
        result
    }
}

/// In-memory directory for tests and local setups.
#[derive(Debug, Default)]
pub struct InMemoryLdapDirectory {
    users: RwLock<HashMap<String, (String, LdapIdentity)>>,
}

impl InMemoryLdapDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user with a password and a `mail` attribute.
    pub async fn add_user(&self, username: &str, password: &str, user_id: &str, mail: &str) {
        let identity = LdapIdentity {
            dn: format!("uid={username},ou=people"),
            user_id: user_id.to_string(),
            username: username.to_string(),
            attributes: HashMap::from([("mail".to_string(), vec![mail.to_string()])]),
        };
        self.users
            .write()
            .await
            .insert(username.to_string(), (password.to_string(), identity));
    }
}

#[async_trait]
impl LdapAuthenticator for InMemoryLdapDirectory {
    async fn authenticate(
        &self,
        _config: &LdapIdpConfig,
        username: &str,
        password: &str,
    ) -> LdapResult<LdapIdentity> {
        match self.users.read().await.get(username) {
            Some((stored, identity)) if !password.is_empty() && stored == password => {
                Ok(identity.clone())
            }
            _ => Err(LdapError::InvalidCredentials),
        }
    }
}
