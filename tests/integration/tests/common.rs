//! Common test utilities and fixtures.

use std::sync::Arc;

use af_core::{Clock, FlowConfig, InstancePolicy, ManualClock};
use af_crypto::{EncryptionKey, SignatureAlgorithm};
use af_federation::{
    IdpConfig, IdpIntentManager, IdpKind, InMemoryIdpRegistry, InMemoryLdapDirectory,
    LdapIdpConfig, OAuthIdpConfig,
};
use af_protocol_oidc::permission::{IAM_LOGIN_CLIENT, ORG_ADMIN_IMPERSONATOR};
use af_protocol_oidc::{
    AccessTokenFormat, App, AuthContext, AuthRequestManager, DeviceAuthorizationManager,
    GrantType, InMemoryAppRegistry, InMemoryGrantStore, InMemoryUserDirectory, MintRequest,
    PermissionChecker, ResponseType, RoleScope, SigningKey, TokenExchangeEngine, TokenIssuer,
    TokenKind,
};
use af_session::{AuthMethod, InMemorySessionVerifier, Session};

const PRIVATE_PEM: &[u8] =
    include_bytes!("../../../crates/af-protocol-oidc/testdata/es384-private.pem");
const PUBLIC_PEM: &[u8] = include_bytes!("../../../crates/af-protocol-oidc/testdata/es384-public.pem");

/// Login UI account allowed to bind sessions to any auth request.
pub const LOGIN_UI: &str = "login-ui";
/// Registered redirect URI of the `web` app.
pub const WEB_CALLBACK: &str = "https://cb";

/// All flow managers wired to shared in-memory collaborators.
pub struct TestEnv {
    pub clock: Arc<ManualClock>,
    pub sessions: Arc<InMemorySessionVerifier>,
    pub grants: Arc<InMemoryGrantStore>,
    pub users: Arc<InMemoryUserDirectory>,
    pub issuer: Arc<TokenIssuer>,
    pub auth_requests: AuthRequestManager,
    pub devices: DeviceAuthorizationManager,
    pub exchange: TokenExchangeEngine,
    pub intents: IdpIntentManager,
}

impl TestEnv {
    /// Creates an environment where token exchange and impersonation are on.
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_policy(InstancePolicy::permissive()).await
    }

    /// Creates an environment with the given instance policy.
    pub async fn with_policy(policy: InstancePolicy) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("af_protocol_oidc=debug,af_federation=debug,audit=info")
            .with_test_writer()
            .try_init();

        let config = FlowConfig::default();
        let clock = Arc::new(ManualClock::starting_now());

        let apps = Arc::new(InMemoryAppRegistry::new());
        apps.register(
            App::new("web", "project-1", "org-1")
                .with_redirect_uri(WEB_CALLBACK)?
                .with_grant_type(GrantType::RefreshToken)
                .with_access_token_format(AccessTokenFormat::Jwt),
        )
        .await;
        apps.register(
            App::new("spa", "project-1", "org-1")
                .with_redirect_uri("https://spa.example.com/*")?
                .with_grant_type(GrantType::Implicit)
                .with_response_type(ResponseType::IdToken)
                .with_response_type(ResponseType::Token),
        )
        .await;
        apps.register(
            App::new("tv", "project-1", "org-1")
                .with_grant_type(GrantType::DeviceCode)
                .with_grant_type(GrantType::RefreshToken),
        )
        .await;
        apps.register(App::new("api", "project-1", "org-1").with_grant_type(GrantType::TokenExchange))
            .await;

        let sessions = Arc::new(InMemorySessionVerifier::new(clock.clone()));
        let grants = Arc::new(InMemoryGrantStore::new());
        grants.add_role(LOGIN_UI, RoleScope::Instance, IAM_LOGIN_CLIENT).await;
        let users = Arc::new(InMemoryUserDirectory::new());
        users.add_user("user-1", "org-1").await;
        users.add_user("user-2", "org-2").await;
        users.add_user("admin-1", "org-1").await;

        let permissions = PermissionChecker::new(grants.clone(), users.clone(), policy);
        let key = SigningKey::from_pem("it-key", SignatureAlgorithm::Es384, PRIVATE_PEM, PUBLIC_PEM)?;
        let issuer = Arc::new(TokenIssuer::new(config.clone(), key, clock.clone()));

        let auth_requests = AuthRequestManager::new(
            config.clone(),
            apps.clone(),
            sessions.clone(),
            permissions.clone(),
            issuer.clone(),
            clock.clone(),
        );
        let devices = DeviceAuthorizationManager::new(
            config.clone(),
            apps.clone(),
            sessions.clone(),
            permissions.clone(),
            issuer.clone(),
            clock.clone(),
        );
        let exchange = TokenExchangeEngine::new(apps, permissions, issuer.clone());

        let idps = Arc::new(InMemoryIdpRegistry::new());
        idps.register(IdpConfig::new(
            "github",
            "GitHub",
            IdpKind::OAuth(OAuthIdpConfig::new(
                "https://github.example.com/login/oauth/authorize",
                "gh-client",
            )),
        ))
        .await;
        idps.register(IdpConfig::new(
            "corp",
            "Corp directory",
            IdpKind::Ldap(LdapIdpConfig::new(
                "ldaps://ldap.corp.example.com",
                "cn=svc,dc=corp,dc=example,dc=com",
                "svc-secret",
                "ou=people,dc=corp,dc=example,dc=com",
            )),
        ))
        .await;
        let directory = Arc::new(InMemoryLdapDirectory::new());
        directory.add_user("alice", "correct horse", "ldap-alice", "alice@corp.example.com").await;
        let intents = IdpIntentManager::new(
            config,
            idps,
            directory,
            EncryptionKey::generate()?,
            clock.clone(),
        );

        Ok(Self {
            clock,
            sessions,
            grants,
            users,
            issuer,
            auth_requests,
            devices,
            exchange,
            intents,
        })
    }

    /// Creates a passkey session for `user_id` of `org`.
    pub async fn passkey_session(&self, user_id: &str, org: &str) -> (Session, String) {
        self.sessions
            .create_session(user_id, org, &[AuthMethod::Passkey])
            .await
    }

    /// Mints an access token for `subject` as the `web` app would receive it.
    pub async fn access_token(&self, subject: &str, scope: &[&str]) -> anyhow::Result<String> {
        let request = MintRequest::new(
            subject,
            "web",
            AuthContext {
                auth_time: self.clock.now(),
                amr: vec!["pwd".to_string()],
                session_id: Some(format!("session-{subject}")),
            },
        )
        .with_scope(scope.iter().map(|s| (*s).to_string()).collect());
        Ok(self.issuer.mint(TokenKind::Access, &request).await?.token)
    }

    /// Makes `user_id` an impersonator within `org`.
    pub async fn grant_org_impersonation(&self, user_id: &str, org: &str) {
        self.grants
            .add_role(
                user_id,
                RoleScope::Organization(org.to_string()),
                ORG_ADMIN_IMPERSONATOR,
            )
            .await;
    }
}

/// Reads a query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
