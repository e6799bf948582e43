//! # af-federation
//!
//! External identity provider logins for the authflow identity core.
//!
//! - [`config`] - Provider configuration and registry
//! - [`intent`] - Intent lifecycle: create, succeed/fail, single retrieval
//! - [`ldap`] - Synchronous LDAP bind authentication
//! - [`saml`] - SAML AuthnRequest construction and bindings
//! - [`error`] - Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod intent;
pub mod ldap;
pub mod saml;

pub use config::{
    IdpConfig, IdpKind, IdpRegistry, InMemoryIdpRegistry, LdapIdpConfig, OAuthIdpConfig,
    SamlBinding, SamlIdpConfig,
};
pub use error::{IntentError, IntentResult, LdapError, LdapResult};
pub use intent::{
    AuthorizationDetails, CreateIntent, IdpIntent, IdpIntentManager, IdpUser, IntentCompletion,
    IntentStart, IntentState, IntentSuccess, LdapLogin, ProviderCredentials, RetrievedIntent,
};
pub use ldap::{InMemoryLdapDirectory, Ldap3Authenticator, LdapAuthenticator, LdapIdentity};
pub use saml::AuthnRequest;
