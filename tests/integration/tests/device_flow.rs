//! Device authorization grant (RFC 8628) from both screens.

use af_protocol_oidc::{
    DeviceAuthorizationRequest, DeviceAuthorizationResponse, DeviceDecision, DeviceTokenRequest,
    OidcError, PollOutcome,
};
use chrono::Duration;

use crate::common::TestEnv;

async fn start(env: &TestEnv) -> anyhow::Result<DeviceAuthorizationResponse> {
    Ok(env
        .devices
        .create(&DeviceAuthorizationRequest {
            client_id: "tv".to_string(),
            scope: Some("openid offline_access".to_string()),
        })
        .await?)
}

async fn approve(env: &TestEnv, user_code: &str) -> anyhow::Result<()> {
    let record = env.devices.get_by_user_code(user_code).await?;
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;
    env.devices
        .authorize_or_deny(
            &record.id,
            DeviceDecision::Approve {
                session_id: session.id,
                session_token,
            },
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn denied_request_reports_access_denied() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = start(&env).await?;
    let poll = DeviceTokenRequest::new("tv", &started.device_code);

    assert!(matches!(
        env.devices.poll(&poll).await?,
        PollOutcome::AuthorizationPending
    ));

    // users type codes in lower case and without the dash
    let typed = started.user_code.replace('-', "").to_lowercase();
    let record = env.devices.get_by_user_code(&typed).await?;
    env.devices
        .authorize_or_deny(&record.id, DeviceDecision::Deny)
        .await?;

    let outcome = env.devices.poll(&poll).await?;
    assert!(matches!(outcome, PollOutcome::AccessDenied));
    assert_eq!(outcome.error_code(), Some("access_denied"));
    Ok(())
}

#[tokio::test]
async fn approved_request_yields_tokens_once() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = start(&env).await?;
    assert_eq!(started.interval, 5);
    assert!(started.verification_uri_complete.ends_with(&started.user_code));
    let poll = DeviceTokenRequest::new("tv", &started.device_code);

    assert!(matches!(
        env.devices.poll(&poll).await?,
        PollOutcome::AuthorizationPending
    ));
    assert!(matches!(env.devices.poll(&poll).await?, PollOutcome::SlowDown));

    approve(&env, &started.user_code).await?;
    env.clock.advance(Duration::seconds(5));

    let PollOutcome::Tokens(tokens) = env.devices.poll(&poll).await? else {
        anyhow::bail!("expected tokens after approval");
    };
    assert!(tokens.refresh_token.is_some());
    let info = env.issuer.resolve_access_token(&tokens.access_token).await?;
    assert_eq!(info.subject, "user-1");
    assert_eq!(info.client_id.as_deref(), Some("tv"));

    let again = env.devices.poll(&poll).await;
    assert!(matches!(again, Err(OidcError::AlreadyConsumed(_))));
    Ok(())
}

#[tokio::test]
async fn expiry_dominates_every_operation() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = start(&env).await?;
    let record = env.devices.get_by_user_code(&started.user_code).await?;
    approve(&env, &started.user_code).await?;

    env.clock.advance(Duration::seconds(started.expires_in + 1));

    let poll = DeviceTokenRequest::new("tv", &started.device_code);
    assert!(matches!(env.devices.poll(&poll).await?, PollOutcome::Expired));
    assert!(matches!(
        env.devices.get_by_user_code(&started.user_code).await,
        Err(OidcError::Expired(_))
    ));
    assert!(matches!(
        env.devices
            .authorize_or_deny(&record.id, DeviceDecision::Deny)
            .await,
        Err(OidcError::Expired(_))
    ));
    Ok(())
}

#[tokio::test]
async fn device_code_is_bound_to_its_client() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = start(&env).await?;
    approve(&env, &started.user_code).await?;

    let stolen = env
        .devices
        .poll(&DeviceTokenRequest::new("web", &started.device_code))
        .await;
    assert!(matches!(stolen, Err(OidcError::InvalidGrant(_))));

    // the rightful device still gets its tokens
    let outcome = env
        .devices
        .poll(&DeviceTokenRequest::new("tv", &started.device_code))
        .await?;
    assert!(matches!(outcome, PollOutcome::Tokens(_)));
    Ok(())
}

#[tokio::test]
async fn clients_without_device_grant_are_refused() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let refused = env
        .devices
        .create(&DeviceAuthorizationRequest {
            client_id: "web".to_string(),
            scope: None,
        })
        .await;
    assert!(matches!(refused, Err(OidcError::UnauthorizedClient(_))));
    Ok(())
}
