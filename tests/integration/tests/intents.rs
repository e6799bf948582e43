//! External identity provider intents: redirect providers and LDAP.

use af_federation::{
    AuthorizationDetails, CreateIntent, IdpUser, IntentError, IntentState, IntentSuccess,
    LdapLogin, ProviderCredentials,
};
use chrono::Duration;
use serde_json::json;

use crate::common::{TestEnv, query_param};

fn github_intent() -> CreateIntent {
    CreateIntent::new(
        "github",
        "instance-1",
        "https://app.example.com/idp/success",
        "https://app.example.com/idp/failure",
    )
}

fn github_success() -> IntentSuccess {
    IntentSuccess {
        idp_user: IdpUser {
            id: "gh-42".to_string(),
            username: "octocat".to_string(),
            raw_information: json!({"login": "octocat", "id": 42}),
        },
        linked_user_id: Some("user-1".to_string()),
        credentials: ProviderCredentials::OAuth {
            access_token: "gho_provider_token".to_string(),
            id_token: None,
        },
    }
}

fn corp_login(password: &str) -> LdapLogin {
    LdapLogin {
        idp_id: "corp".to_string(),
        instance_id: "instance-1".to_string(),
        username: "alice".to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn oauth_intent_is_retrieved_once() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = env.intents.create(github_intent()).await?;
    assert_eq!(started.intent.state, IntentState::Created);
    let AuthorizationDetails::Redirect { url } = &started.details else {
        anyhow::bail!("OAuth providers are reached by redirect");
    };
    assert_eq!(query_param(url, "state").as_deref(), Some(started.intent.id.as_str()));
    assert_eq!(query_param(url, "client_id").as_deref(), Some("gh-client"));

    let completion = env.intents.succeed(&started.intent.id, github_success()).await?;
    let redirect = completion.redirect.clone().expect("success URL configured");
    assert!(redirect.starts_with("https://app.example.com/idp/success?"));
    assert_eq!(query_param(&redirect, "token").as_deref(), Some(completion.token.as_str()));

    let wrong = env.intents.retrieve(&started.intent.id, "not-the-token").await;
    assert!(matches!(wrong, Err(IntentError::InvalidToken)));

    let retrieved = env.intents.retrieve(&started.intent.id, &completion.token).await?;
    assert_eq!(retrieved.idp_user.username, "octocat");
    assert_eq!(retrieved.linked_user_id.as_deref(), Some("user-1"));
    assert_eq!(
        retrieved.credentials,
        ProviderCredentials::OAuth {
            access_token: "gho_provider_token".to_string(),
            id_token: None,
        }
    );

    let again = env.intents.retrieve(&started.intent.id, &completion.token).await;
    assert!(matches!(again, Err(IntentError::AlreadyConsumed)));
    Ok(())
}

#[tokio::test]
async fn failed_intent_cannot_be_retrieved_or_completed() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = env.intents.create(github_intent().with_user("user-1")).await?;
    assert_eq!(started.intent.user_id.as_deref(), Some("user-1"));

    let completion = env.intents.fail(&started.intent.id, "user cancelled").await?;
    let redirect = completion.redirect.clone().expect("failure URL configured");
    assert!(redirect.starts_with("https://app.example.com/idp/failure?"));

    let read = env.intents.retrieve(&started.intent.id, &completion.token).await;
    assert!(matches!(read, Err(IntentError::NotSucceeded)));

    let late = env.intents.succeed(&started.intent.id, github_success()).await;
    assert!(matches!(late, Err(IntentError::AlreadyTerminal)));
    assert_eq!(
        env.intents.get(&started.intent.id).await?.failure_reason.as_deref(),
        Some("user cancelled")
    );
    Ok(())
}

#[tokio::test]
async fn intent_expires_before_completion() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = env.intents.create(github_intent()).await?;

    env.clock.advance(Duration::hours(2));
    assert!(matches!(
        env.intents.get(&started.intent.id).await,
        Err(IntentError::Expired)
    ));
    assert!(matches!(
        env.intents.succeed(&started.intent.id, github_success()).await,
        Err(IntentError::Expired)
    ));
    Ok(())
}

#[tokio::test]
async fn credentials_must_fit_the_provider() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let started = env.intents.create(github_intent()).await?;
    let mut success = github_success();
    success.credentials = ProviderCredentials::Saml {
        assertion: "<saml:Assertion/>".to_string(),
    };

    let mismatch = env.intents.succeed(&started.intent.id, success).await;
    assert!(matches!(mismatch, Err(IntentError::InvalidArgument(_))));
    assert_eq!(
        env.intents.get(&started.intent.id).await?.state,
        IntentState::Created
    );
    Ok(())
}

#[tokio::test]
async fn ldap_login_completes_intent() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let completion = env.intents.start_ldap(corp_login("correct horse")).await?;
    assert!(completion.redirect.is_none());

    let retrieved = env
        .intents
        .retrieve(&completion.intent_id, &completion.token)
        .await?;
    assert_eq!(retrieved.idp_user.id, "ldap-alice");
    assert_eq!(retrieved.idp_user.username, "alice");
    let ProviderCredentials::Ldap { attributes } = retrieved.credentials else {
        anyhow::bail!("LDAP intents carry directory attributes");
    };
    assert_eq!(attributes["mail"], vec!["alice@corp.example.com".to_string()]);
    Ok(())
}

#[tokio::test]
async fn ldap_rejects_wrong_password() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let rejected = env.intents.start_ldap(corp_login("battery staple")).await;
    assert!(matches!(rejected, Err(IntentError::InvalidCredentials)));

    let mut unknown = corp_login("correct horse");
    unknown.username = "mallory".to_string();
    let rejected = env.intents.start_ldap(unknown).await;
    assert!(matches!(rejected, Err(IntentError::InvalidCredentials)));
    Ok(())
}

#[tokio::test]
async fn ldap_providers_are_not_redirect_targets() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let corp = CreateIntent::new(
        "corp",
        "instance-1",
        "https://app.example.com/idp/success",
        "https://app.example.com/idp/failure",
    );
    assert!(matches!(
        env.intents.create(corp).await,
        Err(IntentError::InvalidArgument(_))
    ));

    let mut login = corp_login("correct horse");
    login.idp_id = "github".to_string();
    assert!(matches!(
        env.intents.start_ldap(login).await,
        Err(IntentError::InvalidArgument(_))
    ));
    Ok(())
}
