//! Token exchange: delegation, impersonation and scope narrowing.

use af_core::InstancePolicy;
use af_protocol_oidc::permission::IAM_ADMIN_IMPERSONATOR;
use af_protocol_oidc::{
    AuthorizationRequest, CallbackOutcome, OidcError, RoleScope, TokenExchangeRequest,
    TokenRequest, TokenTypeUri,
};

use crate::common::{LOGIN_UI, TestEnv, WEB_CALLBACK, query_param};

const ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
const REFRESH_TOKEN: &str = "urn:ietf:params:oauth:token-type:refresh_token";
const JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
const USER_ID: &str = "urn:authflow:params:oauth:token-type:user_id";

fn impersonate(actor_token: &str, subject_user: &str) -> TokenExchangeRequest {
    TokenExchangeRequest::new("api", subject_user, USER_ID).with_actor(actor_token, ACCESS_TOKEN)
}

#[tokio::test]
async fn exchange_is_off_without_policy() -> anyhow::Result<()> {
    let env = TestEnv::with_policy(InstancePolicy::default()).await?;
    let subject = env.access_token("user-1", &["openid"]).await?;
    let result = env
        .exchange
        .exchange(&TokenExchangeRequest::new("api", subject, ACCESS_TOKEN))
        .await;
    assert!(matches!(result, Err(OidcError::FeatureDisabled(_))));
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_are_never_exchanged() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let subject = env.access_token("user-1", &["openid"]).await?;

    let as_subject = env
        .exchange
        .exchange(&TokenExchangeRequest::new("api", "some-refresh-token", REFRESH_TOKEN))
        .await;
    assert!(matches!(as_subject, Err(OidcError::UnsupportedTokenType(_))));

    let as_requested = env
        .exchange
        .exchange(
            &TokenExchangeRequest::new("api", subject, ACCESS_TOKEN)
                .with_requested_type(REFRESH_TOKEN),
        )
        .await;
    assert!(matches!(as_requested, Err(OidcError::UnsupportedTokenType(_))));
    Ok(())
}

#[tokio::test]
async fn client_needs_exchange_grant() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let subject = env.access_token("user-1", &["openid"]).await?;
    let result = env
        .exchange
        .exchange(&TokenExchangeRequest::new("web", subject, ACCESS_TOKEN))
        .await;
    assert!(matches!(result, Err(OidcError::UnauthorizedClient(_))));
    Ok(())
}

#[tokio::test]
async fn impersonation_requires_a_grant() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let admin = env.access_token("admin-1", &["openid", "profile"]).await?;

    let denied = env.exchange.exchange(&impersonate(&admin, "user-1")).await;
    match denied {
        Err(OidcError::PermissionDenied(reason)) => {
            assert_eq!(reason, "Errors.TokenExchange.Token.NoImpersonationPermission");
        }
        other => anyhow::bail!("expected PermissionDenied, got {other:?}"),
    }

    // an org grant covers users of that organization only
    env.grant_org_impersonation("admin-1", "org-1").await;
    env.exchange.exchange(&impersonate(&admin, "user-1")).await?;
    let other_org = env.exchange.exchange(&impersonate(&admin, "user-2")).await;
    assert!(matches!(other_org, Err(OidcError::PermissionDenied(_))));

    // an instance grant covers every organization
    env.grants
        .add_role("admin-1", RoleScope::Instance, IAM_ADMIN_IMPERSONATOR)
        .await;
    env.exchange.exchange(&impersonate(&admin, "user-2")).await?;
    Ok(())
}

#[tokio::test]
async fn user_id_subject_needs_actor_and_active_user() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.grant_org_impersonation("admin-1", "org-1").await;

    let unauthenticated = env
        .exchange
        .exchange(&TokenExchangeRequest::new("api", "user-1", USER_ID))
        .await;
    assert!(matches!(unauthenticated, Err(OidcError::InvalidRequest(_))));

    env.users.deactivate("user-1").await;
    let admin = env.access_token("admin-1", &["openid"]).await?;
    let inactive = env.exchange.exchange(&impersonate(&admin, "user-1")).await;
    assert!(matches!(inactive, Err(OidcError::InvalidToken(_))));
    Ok(())
}

#[tokio::test]
async fn actor_survives_re_exchange() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.grant_org_impersonation("admin-1", "org-1").await;
    let admin = env.access_token("admin-1", &["openid", "profile", "email"]).await?;

    let delegated = env.exchange.exchange(&impersonate(&admin, "user-1")).await?;
    assert_eq!(delegated.issued_token_type, TokenTypeUri::AccessToken);
    assert_eq!(delegated.token_type, "Bearer");
    let info = env.issuer.resolve_access_token(&delegated.access_token).await?;
    assert_eq!(info.subject, "user-1");
    let actor = info.actor.expect("impersonation token names its actor");
    assert_eq!(actor.sub, "admin-1");
    assert_eq!(actor.iss, env.issuer.issuer());

    // exchanging the delegated token again keeps the actor and narrows scope
    let again = env
        .exchange
        .exchange(
            &TokenExchangeRequest::new("api", &delegated.access_token, ACCESS_TOKEN)
                .with_requested_type(JWT)
                .with_scope("openid email"),
        )
        .await?;
    assert_eq!(again.scope.as_deref(), Some("openid email"));
    let info = env.issuer.resolve_access_token(&again.access_token).await?;
    assert_eq!(info.subject, "user-1");
    assert_eq!(info.actor.map(|a| a.sub).as_deref(), Some("admin-1"));

    // a delegated token cannot act for someone else
    let chained = env
        .exchange
        .exchange(
            &TokenExchangeRequest::new("api", "user-1", USER_ID)
                .with_actor(&delegated.access_token, ACCESS_TOKEN),
        )
        .await;
    assert!(matches!(chained, Err(OidcError::PermissionDenied(_))));
    Ok(())
}

#[tokio::test]
async fn exchange_never_widens_scope() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let subject = env.access_token("user-1", &["openid", "profile"]).await?;

    let narrowed = env
        .exchange
        .exchange(
            &TokenExchangeRequest::new("api", &subject, ACCESS_TOKEN)
                .with_scope("profile email"),
        )
        .await?;
    assert_eq!(narrowed.scope.as_deref(), Some("profile"));
    let info = env.issuer.resolve_access_token(&narrowed.access_token).await?;
    assert_eq!(info.scope, vec!["profile".to_string()]);
    assert!(info.actor.is_none());

    let disjoint = env
        .exchange
        .exchange(
            &TokenExchangeRequest::new("api", &subject, ACCESS_TOKEN).with_scope("email phone"),
        )
        .await;
    assert!(matches!(disjoint, Err(OidcError::InvalidScope(_))));
    Ok(())
}

#[tokio::test]
async fn code_flow_token_can_be_delegated() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;
    let request = env
        .auth_requests
        .create(
            AuthorizationRequest::new("web", WEB_CALLBACK, "code").with_scope("openid profile"),
            Some(LOGIN_UI),
        )
        .await?;
    env.auth_requests
        .bind_session(&request.id, &session.id, LOGIN_UI)
        .await?;
    let url = env
        .auth_requests
        .create_callback(
            &request.id,
            CallbackOutcome::Session {
                session_id: session.id.clone(),
                session_token,
            },
        )
        .await?;
    let code = query_param(&url, "code").expect("code in callback");
    let tokens = env
        .auth_requests
        .exchange_code(&TokenRequest::authorization_code("web", code, WEB_CALLBACK))
        .await?;

    // the web app issues JWT access tokens, so the jwt type resolves too
    let exchanged = env
        .exchange
        .exchange(&TokenExchangeRequest::new("api", &tokens.access_token, JWT))
        .await?;
    let info = env.issuer.resolve_access_token(&exchanged.access_token).await?;
    assert_eq!(info.subject, "user-1");
    assert_eq!(info.client_id.as_deref(), Some("api"));
    // the delegated token is for the exchanging client, not the web app
    assert_eq!(info.audience, vec!["project-1", "api"]);
    assert_eq!(info.auth.session_id.as_deref(), Some(session.id.as_str()));
    assert!(info.auth.amr.iter().any(|m| m == "hwk"));
    Ok(())
}
