mod common;

use chrono::{Duration, Utc};
use common::*;
use credential_service::{
    dtos::auth::{CreateApiKeyRequest, KeyEnvironmentDto},
    services::{
        api_key::validate_format,
        jwt::{ApiKeyClaims, AuthMethod},
        AuthError, Credential, JwtService,
    },
    store::CredentialStore,
};
use uuid::Uuid;

fn key_request(name: &str) -> CreateApiKeyRequest {
    CreateApiKeyRequest {
        name: name.to_string(),
        scopes: vec!["read:content".to_string(), "execute:ai".to_string()],
        organization_id: None,
        environment: KeyEnvironmentDto::Test,
        expires_in_days: Some(30),
        rate_limit: None,
    }
}

#[tokio::test]
async fn test_created_key_authenticates() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let alice = register_alice(&app).await;

    let created = app
        .state
        .auth
        .create_api_key(alice.user.id, key_request("deploy"))
        .await?;
    assert!(created.key.starts_with("sk_test_"));
    assert!(validate_format(&created.key).is_ok());
    assert_eq!(created.info.prefix, "sk_test_");

    let context = app
        .state
        .auth
        .authenticate(&Credential::ApiKey(created.key.clone()))
        .await?;
    assert_eq!(context.user_id, alice.user.id);
    assert_eq!(context.method, AuthMethod::ApiKey);
    assert_eq!(context.api_key_id, Some(created.info.id));
    assert!(context.require_scopes(&["read:content"]).is_ok());
    assert!(matches!(
        context.require_scopes(&["write:content"]),
        Err(AuthError::InsufficientScopes)
    ));
    Ok(())
}

#[tokio::test]
async fn test_last_used_recorded_in_background() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let alice = register_alice(&app).await;
    let created = app
        .state
        .auth
        .create_api_key(alice.user.id, key_request("ci"))
        .await?;

    app.state.auth.api_keys().validate(&created.key).await?;

    let mut recorded = false;
    for _ in 0..100 {
        if app.store.get_api_key(created.info.id).await?.last_used_at.is_some() {
            recorded = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(recorded);
    Ok(())
}

#[tokio::test]
async fn test_malformed_key_rejected_before_lookup() {
    let app = spawn_app();
    let result = app
        .state
        .auth
        .authenticate(&Credential::ApiKey("sk_live_not-hex".to_string()))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidApiKeyFormat)));
}

#[tokio::test]
async fn test_expired_key_reports_expired() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let alice = register_alice(&app).await;
    let created = app
        .state
        .auth
        .create_api_key(alice.user.id, key_request("short-lived"))
        .await?;

    // Age the stored record past its expiry.
    let mut record = app.store.get_api_key(created.info.id).await?;
    record.expires_at = Utc::now() - Duration::minutes(1);
    app.store.delete_api_key(record.id).await?;
    app.store.create_api_key(&record).await?;

    let result = app
        .state
        .auth
        .authenticate(&Credential::ApiKey(created.key))
        .await;
    assert!(matches!(result, Err(AuthError::ApiKeyExpired)));
    Ok(())
}

#[tokio::test]
async fn test_revoked_key_rejected_immediately() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let alice = register_alice(&app).await;
    let created = app
        .state
        .auth
        .create_api_key(alice.user.id, key_request("revoke-me"))
        .await?;

    // Warm the cache first.
    app.state
        .auth
        .authenticate(&Credential::ApiKey(created.key.clone()))
        .await?;

    let stranger = app
        .state
        .auth
        .revoke_api_key(Uuid::new_v4(), created.info.id)
        .await;
    assert!(matches!(stranger, Err(AuthError::InvalidApiKey)));

    app.state
        .auth
        .revoke_api_key(alice.user.id, created.info.id)
        .await?;

    let result = app
        .state
        .auth
        .authenticate(&Credential::ApiKey(created.key))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidApiKey)));
    assert!(app.state.auth.list_api_keys(alice.user.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_scope_rejected() {
    let app = spawn_app();
    let alice = register_alice(&app).await;

    let mut request = key_request("bad-scope");
    request.scopes.push("system:manage".to_string());
    let result = app.state.auth.create_api_key(alice.user.id, request).await;

    assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_key_token_is_bounded_by_key_lifetime() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let alice = register_alice(&app).await;
    let created = app
        .state
        .auth
        .create_api_key(alice.user.id, key_request("exchange"))
        .await?;

    let issued = app.state.auth.issue_api_key_token(&created.key).await?;
    assert!(issued.expires_at <= created.info.expires_at);

    let jwt = JwtService::new(&settings().jwt)?;
    let envelope = jwt.validate::<ApiKeyClaims>(&issued.token)?;
    assert_eq!(envelope.claims.kid, created.info.id);
    assert_eq!(envelope.claims.uid, alice.user.id);
    assert_eq!(envelope.claims.rate_limit, 100);
    assert_eq!(envelope.claims.scopes, vec!["read:content", "execute:ai"]);
    Ok(())
}
