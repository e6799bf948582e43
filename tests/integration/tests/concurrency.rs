//! Racing callers: every single-use transition has exactly one winner.

use std::sync::Arc;

use af_federation::{IdpUser, IntentError, IntentSuccess, ProviderCredentials};
use af_protocol_oidc::{
    AuthorizationRequest, CallbackOutcome, DeviceAuthorizationRequest, DeviceDecision,
    DeviceTokenRequest, OidcError, PollOutcome, TokenRequest,
};
use chrono::Duration;
use serde_json::json;

use crate::common::{LOGIN_UI, TestEnv, WEB_CALLBACK, query_param};

const RACERS: usize = 16;

async fn bound_request(env: &TestEnv) -> anyhow::Result<(String, CallbackOutcome)> {
    let (session, session_token) = env.passkey_session("user-1", "org-1").await;
    let request = env
        .auth_requests
        .create(
            AuthorizationRequest::new("web", WEB_CALLBACK, "code").with_scope("openid"),
            Some(LOGIN_UI),
        )
        .await?;
    env.auth_requests
        .bind_session(&request.id, &session.id, LOGIN_UI)
        .await?;
    Ok((
        request.id,
        CallbackOutcome::Session {
            session_id: session.id,
            session_token,
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_callback_per_auth_request() -> anyhow::Result<()> {
    let env = Arc::new(TestEnv::new().await?);
    let (id, callback) = bound_request(&env).await?;

    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let env = env.clone();
        let id = id.clone();
        let callback = callback.clone();
        handles.push(tokio::spawn(async move {
            env.auth_requests.create_callback(&id, callback).await
        }));
    }

    let mut codes = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(url) => codes.push(url),
            Err(OidcError::AlreadyConsumed(_)) => {}
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(codes.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_code_exchange_wins() -> anyhow::Result<()> {
    let env = Arc::new(TestEnv::new().await?);
    let (id, callback) = bound_request(&env).await?;
    let url = env.auth_requests.create_callback(&id, callback).await?;
    let code = query_param(&url, "code").expect("code in callback");

    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let env = env.clone();
        let request = TokenRequest::authorization_code("web", code.clone(), WEB_CALLBACK);
        handles.push(tokio::spawn(async move {
            env.auth_requests.exchange_code(&request).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_device_decision_and_one_token_set() -> anyhow::Result<()> {
    let env = Arc::new(TestEnv::new().await?);
    let started = env
        .devices
        .create(&DeviceAuthorizationRequest {
            client_id: "tv".to_string(),
            scope: Some("openid".to_string()),
        })
        .await?;
    let record = env.devices.get_by_user_code(&started.user_code).await?;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let env = env.clone();
        let id = record.id.clone();
        let (session, session_token) = env.passkey_session("user-1", "org-1").await;
        handles.push(tokio::spawn(async move {
            let decision = if i % 2 == 0 {
                DeviceDecision::Approve {
                    session_id: session.id,
                    session_token,
                }
            } else {
                DeviceDecision::Deny
            };
            env.devices.authorize_or_deny(&id, decision).await
        }));
    }
    let mut decided = 0;
    for handle in handles {
        match handle.await? {
            Ok(()) => decided += 1,
            Err(OidcError::AlreadyDecided) => {}
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(decided, 1);

    env.clock.advance(Duration::seconds(started.interval));
    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let env = env.clone();
        let request = DeviceTokenRequest::new("tv", &started.device_code);
        handles.push(tokio::spawn(async move { env.devices.poll(&request).await }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await?);
    }

    let tokens = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(PollOutcome::Tokens(_))))
        .count();
    let denied = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(PollOutcome::AccessDenied)))
        .count();
    // approval hands out one token set; denial is reported to every poll
    assert!(
        (tokens == 1 && denied == 0) || (tokens == 0 && denied == RACERS),
        "tokens={tokens} denied={denied}"
    );
    if tokens == 1 {
        let replays = outcomes
            .iter()
            .filter(|o| matches!(o, Err(OidcError::AlreadyConsumed(_))))
            .count();
        assert_eq!(replays, RACERS - 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_intent_completion() -> anyhow::Result<()> {
    let env = Arc::new(TestEnv::new().await?);
    let started = env
        .intents
        .create(af_federation::CreateIntent::new(
            "github",
            "instance-1",
            "https://app.example.com/idp/success",
            "https://app.example.com/idp/failure",
        ))
        .await?;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let env = env.clone();
        let id = started.intent.id.clone();
        handles.push(tokio::spawn(async move {
            let success = IntentSuccess {
                idp_user: IdpUser {
                    id: format!("gh-{i}"),
                    username: format!("racer-{i}"),
                    raw_information: json!({ "racer": i }),
                },
                linked_user_id: None,
                credentials: ProviderCredentials::OAuth {
                    access_token: format!("provider-token-{i}"),
                    id_token: None,
                },
            };
            env.intents.succeed(&id, success).await
        }));
    }

    let mut completions = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(completion) => completions.push(completion),
            Err(IntentError::AlreadyTerminal) => {}
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(completions.len(), 1);

    // the stored result belongs to the winner
    let winner = &completions[0];
    let retrieved = env.intents.retrieve(&winner.intent_id, &winner.token).await?;
    let racer = retrieved.idp_user.id.trim_start_matches("gh-").to_string();
    assert_eq!(
        retrieved.credentials,
        ProviderCredentials::OAuth {
            access_token: format!("provider-token-{racer}"),
            id_token: None,
        }
    );
    Ok(())
}
