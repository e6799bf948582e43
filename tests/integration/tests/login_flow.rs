//! Browser login flows: auth request, session binding, callback, code exchange.

use af_protocol_oidc::{
    AuthRequestState, AuthorizationError, AuthorizationRequest, CallbackOutcome, OidcError,
    TokenRequest,
};
use chrono::Duration;

use crate::common::{LOGIN_UI, TestEnv, WEB_CALLBACK, query_param};

fn web_request() -> AuthorizationRequest {
    AuthorizationRequest::new("web", WEB_CALLBACK, "code")
        .with_scope("openid profile offline_access")
        .with_state("xyz")
}

#[tokio::test]
async fn code_flow_with_passkey_session() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;

    let request = env.auth_requests.create(web_request(), Some(LOGIN_UI)).await?;
    assert_eq!(request.status, AuthRequestState::Pending);
    env.auth_requests
        .bind_session(&request.id, &session.id, LOGIN_UI)
        .await?;

    let callback = CallbackOutcome::Session {
        session_id: session.id.clone(),
        session_token: session_token.clone(),
    };
    let url = env.auth_requests.create_callback(&request.id, callback.clone()).await?;
    assert!(url.starts_with("https://cb?code="));
    assert_eq!(query_param(&url, "state").as_deref(), Some("xyz"));

    let second = env.auth_requests.create_callback(&request.id, callback).await;
    assert!(matches!(second, Err(OidcError::AlreadyConsumed(_))));

    let code = query_param(&url, "code").expect("code in callback");
    let tokens = env
        .auth_requests
        .exchange_code(&TokenRequest::authorization_code("web", code, WEB_CALLBACK))
        .await?;
    assert_eq!(tokens.token_type, "Bearer");
    assert!(tokens.id_token.is_some());

    let info = env.issuer.resolve_access_token(&tokens.access_token).await?;
    assert_eq!(info.subject, "user-1");
    assert_eq!(info.auth.session_id.as_deref(), Some(session.id.as_str()));
    assert!(info.auth.amr.iter().any(|m| m == "hwk"));
    assert!(info.actor.is_none());

    // refresh rotates: the presented token works once
    let refresh_token = tokens.refresh_token.expect("offline_access grants a refresh token");
    let rotated = env.issuer.refresh(&refresh_token, "web", None).await?;
    assert!(rotated.refresh_token.is_some());
    let reused = env.issuer.refresh(&refresh_token, "web", None).await;
    assert!(matches!(reused, Err(OidcError::AlreadyConsumed(_))));
    Ok(())
}

#[tokio::test]
async fn implicit_flow_answers_in_fragment() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;

    let request = env
        .auth_requests
        .create(
            AuthorizationRequest::new("spa", "https://spa.example.com/callback", "id_token token")
                .with_scope("openid")
                .with_nonce("n-0S6_WzA2Mj")
                .with_state("af0ifjsldkj"),
            None,
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
                session_id: session.id,
                session_token,
            },
        )
        .await?;

    let (base, fragment) = url.split_once('#').expect("implicit responses use the fragment");
    assert_eq!(base, "https://spa.example.com/callback");
    assert!(fragment.contains("access_token="));
    assert!(fragment.contains("id_token="));
    assert!(fragment.contains("state=af0ifjsldkj"));
    assert!(!fragment.contains("code="));
    Ok(())
}

#[tokio::test]
async fn cancelled_login_redirects_with_error() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let request = env.auth_requests.create(web_request(), Some(LOGIN_UI)).await?;

    let url = env
        .auth_requests
        .create_callback(
            &request.id,
            CallbackOutcome::Error(AuthorizationError::new("access_denied")),
        )
        .await?;
    assert_eq!(query_param(&url, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&url, "state").as_deref(), Some("xyz"));
    assert!(query_param(&url, "code").is_none());

    let stored = env.auth_requests.get(&request.id).await?;
    assert_eq!(stored.status, AuthRequestState::Failed);
    Ok(())
}

#[tokio::test]
async fn foreign_login_client_cannot_bind() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (session, _) = env.passkey_session("user-1", "org-1").await;
    let request = env.auth_requests.create(web_request(), Some("custom-login")).await?;

    let denied = env
        .auth_requests
        .bind_session(&request.id, &session.id, "someone-else")
        .await;
    assert!(matches!(denied, Err(OidcError::PermissionDenied(_))));

    // the owning login client and trusted login UIs may bind
    env.auth_requests
        .bind_session(&request.id, &session.id, "custom-login")
        .await?;
    env.auth_requests
        .bind_session(&request.id, &session.id, LOGIN_UI)
        .await?;
    Ok(())
}

#[tokio::test]
async fn terminated_session_leaves_request_open() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (stale, stale_token) = env.passkey_session("user-1", "org-1").await;
    let request = env.auth_requests.create(web_request(), Some(LOGIN_UI)).await?;
    env.auth_requests
        .bind_session(&request.id, &stale.id, LOGIN_UI)
        .await?;
    env.sessions.terminate(&stale.id).await;

    let rejected = env
        .auth_requests
        .create_callback(
            &request.id,
            CallbackOutcome::Session {
                session_id: stale.id,
                session_token: stale_token,
            },
        )
        .await;
    assert!(rejected.is_err());
    assert_eq!(
        env.auth_requests.get(&request.id).await?.status,
        AuthRequestState::Bound
    );

    // the login UI re-binds a fresh session and finishes the login
    let (fresh, fresh_token) = env.passkey_session("user-1", "org-1").await;
    env.auth_requests
        .bind_session(&request.id, &fresh.id, LOGIN_UI)
        .await?;
    let url = env
        .auth_requests
        .create_callback(
            &request.id,
            CallbackOutcome::Session {
                session_id: fresh.id,
                session_token: fresh_token,
            },
        )
        .await?;
    assert!(query_param(&url, "code").is_some());
    Ok(())
}

#[tokio::test]
async fn authorization_code_expires() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;
    let request = env.auth_requests.create(web_request(), Some(LOGIN_UI)).await?;
    env.auth_requests
        .bind_session(&request.id, &session.id, LOGIN_UI)
        .await?;
    let url = env
        .auth_requests
        .create_callback(
            &request.id,
            CallbackOutcome::Session {
                session_id: session.id,
                session_token,
            },
        )
        .await?;

    env.clock.advance(Duration::seconds(61));
    let code = query_param(&url, "code").expect("code in callback");
    let late = env
        .auth_requests
        .exchange_code(&TokenRequest::authorization_code("web", code, WEB_CALLBACK))
        .await;
    assert!(late.is_err());
    Ok(())
}
