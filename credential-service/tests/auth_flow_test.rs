mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use credential_service::{
    config::SessionConfig,
    models::{Account, ApiKey, Session, LOCAL_PROVIDER},
    services::{jwt::AccessClaims, AuthError, Credential, LockoutPolicy, LoginAttempt},
    store::{CredentialStore, MemoryCredentialStore, StoreError, UserDirectory},
    CoreSettings,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[tokio::test]
async fn test_register_then_login_scenario() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let registered = register_alice(&app).await;
    assert_eq!(registered.user.email, ALICE_EMAIL);

    let wrong = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, "Wrong123!"), client())
        .await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

    let result = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;
    assert_eq!(result.session.user_id, registered.user.id);
    assert!(!result.tokens.access_token.is_empty());
    assert!(!result.tokens.refresh_token.is_empty());
    assert_eq!(result.tokens.token_type, "Bearer");
    assert_eq!(result.session.ip_address.as_deref(), Some("203.0.113.7"));
    Ok(())
}

#[tokio::test]
async fn test_login_email_is_case_insensitive() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    register_alice(&app).await;

    let result = app
        .state
        .auth
        .login(login_request("Alice@Example.COM", ALICE_PASSWORD), client())
        .await?;
    assert_eq!(result.user.email, ALICE_EMAIL);
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
    let app = spawn_app();
    register_alice(&app).await;

    let unknown = app
        .state
        .auth
        .login(login_request("bob@example.com", ALICE_PASSWORD), client())
        .await;
    let wrong = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, "Nope1234!"), client())
        .await;

    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn test_unknown_user_still_pays_for_password_check() {
    let app = spawn_app();
    register_alice(&app).await;

    let mut wrong_password = Duration::MAX;
    for _ in 0..2 {
        let started = Instant::now();
        let result = app
            .state
            .auth
            .login(login_request(ALICE_EMAIL, "Nope1234!"), client())
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        wrong_password = wrong_password.min(started.elapsed());
    }

    let started = Instant::now();
    let unknown = app
        .state
        .auth
        .login(login_request("bob@example.com", ALICE_PASSWORD), client())
        .await;
    let unknown_user = started.elapsed();

    assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    assert!(
        unknown_user * 4 >= wrong_password,
        "unknown user answered in {:?}, wrong password in {:?}",
        unknown_user,
        wrong_password
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LockoutCall {
    Check(String, Option<String>),
    Failure(String, Option<String>),
    Success(String, Option<String>),
}

/// Records every lockout hook call and locks out one address.
#[derive(Default)]
struct RecordingLockout {
    calls: Mutex<Vec<LockoutCall>>,
    blocked_ip: Option<String>,
}

impl RecordingLockout {
    fn record(&self, call: LockoutCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<LockoutCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn owned(attempt: LoginAttempt<'_>) -> (String, Option<String>) {
    (
        attempt.email.to_string(),
        attempt.ip_address.map(str::to_string),
    )
}

#[async_trait]
impl LockoutPolicy for RecordingLockout {
    async fn check(&self, attempt: LoginAttempt<'_>) -> Result<(), AuthError> {
        let (email, ip) = owned(attempt);
        let blocked = ip.is_some() && ip == self.blocked_ip;
        self.record(LockoutCall::Check(email, ip));
        if blocked {
            return Err(AuthError::RateLimitExceeded {
                retry_after_secs: 60,
            });
        }
        Ok(())
    }

    async fn record_failure(&self, attempt: LoginAttempt<'_>) {
        let (email, ip) = owned(attempt);
        self.record(LockoutCall::Failure(email, ip));
    }

    async fn record_success(&self, attempt: LoginAttempt<'_>) {
        let (email, ip) = owned(attempt);
        self.record(LockoutCall::Success(email, ip));
    }
}

#[tokio::test]
async fn test_lockout_sees_email_and_client_address() -> Result<(), anyhow::Error> {
    let lockout = Arc::new(RecordingLockout::default());
    let hook = lockout.clone();
    let app = spawn_app_with(common::settings(), move |backends| backends.lockout = hook);
    register_alice(&app).await;

    let _ = app
        .state
        .auth
        .login(login_request("Alice@Example.com", "Wrong123!"), client())
        .await;
    app.state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;

    let who = || (ALICE_EMAIL.to_string(), Some("203.0.113.7".to_string()));
    assert_eq!(
        lockout.calls(),
        vec![
            LockoutCall::Check(who().0, who().1),
            LockoutCall::Failure(who().0, who().1),
            LockoutCall::Check(who().0, who().1),
            LockoutCall::Success(who().0, who().1),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_lockout_can_block_by_address() {
    let lockout = Arc::new(RecordingLockout {
        blocked_ip: Some("203.0.113.7".to_string()),
        ..RecordingLockout::default()
    });
    let hook = lockout.clone();
    let app = spawn_app_with(common::settings(), move |backends| backends.lockout = hook);
    register_alice(&app).await;

    let result = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await;
    assert!(matches!(result, Err(AuthError::RateLimitExceeded { .. })));
    assert_eq!(lockout.calls().len(), 1);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let app = spawn_app();
    register_alice(&app).await;

    let again = app
        .state
        .auth
        .register(register_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await;
    assert!(matches!(again, Err(AuthError::UserExists)));
}

#[tokio::test]
async fn test_weak_password_reports_every_rule() {
    let app = spawn_app();

    let result = app
        .state
        .auth
        .register(register_request(ALICE_EMAIL, "abc"), client())
        .await;

    match result {
        Err(AuthError::WeakPassword(failures)) => assert_eq!(failures.len(), 4),
        other => panic!("expected WeakPassword, got {:?}", other.map(|r| r.user.id)),
    }
    assert!(app.users.get_user_by_email(ALICE_EMAIL).await.is_err());
}

#[tokio::test]
async fn test_verification_mail_sent_after_registration() {
    let app = spawn_app();
    let result = register_alice(&app).await;
    assert!(!result.user.email_verified);

    let mail = app.mail.clone();
    assert!(eventually(|| mail.verification_token(ALICE_EMAIL).is_some()).await);
    assert!(mail.welcome_recipients().is_empty());
}

#[tokio::test]
async fn test_logout_twice() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    app.state.auth.logout(&result.session.token).await?;
    let second = app.state.auth.logout(&result.session.token).await;

    assert!(matches!(second, Err(AuthError::InvalidToken)));
    Ok(())
}

#[tokio::test]
async fn test_refresh_issues_new_pair() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    let pair = app
        .state
        .auth
        .refresh_token(&result.tokens.refresh_token)
        .await?;
    assert!(!pair.access_token.is_empty());

    let context = app.state.auth.validate_token(&pair.access_token).await?;
    assert_eq!(context.user_id, result.user.id);
    assert_eq!(context.session_id, Some(result.session.id));
    Ok(())
}

#[tokio::test]
async fn test_refresh_fails_after_logout() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    app.state.auth.logout(&result.session.token).await?;

    let refreshed = app
        .state
        .auth
        .refresh_token(&result.tokens.refresh_token)
        .await;
    assert!(matches!(refreshed, Err(AuthError::InvalidToken)));

    let validated = app
        .state
        .auth
        .validate_token(&result.tokens.access_token)
        .await;
    assert!(matches!(validated, Err(AuthError::InvalidToken)));
    Ok(())
}

#[tokio::test]
async fn test_access_token_cannot_refresh() {
    let app = spawn_app();
    let result = register_alice(&app).await;

    let refreshed = app
        .state
        .auth
        .refresh_token(&result.tokens.access_token)
        .await;
    assert!(matches!(refreshed, Err(AuthError::InvalidToken)));
}

#[tokio::test]
async fn test_remember_me_extends_refresh_lifetime() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    register_alice(&app).await;

    let standard = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;
    let mut request = login_request(ALICE_EMAIL, ALICE_PASSWORD);
    request.remember_me = true;
    let extended = app.state.auth.login(request, client()).await?;

    let gap = extended.tokens.refresh_expires_at - standard.tokens.refresh_expires_at;
    assert!(gap > chrono::Duration::days(22));

    // The longer lifetime survives a refresh.
    let pair = app
        .state
        .auth
        .refresh_token(&extended.tokens.refresh_token)
        .await?;
    assert!(pair.refresh_expires_at > Utc::now() + chrono::Duration::days(29));
    Ok(())
}

#[tokio::test]
async fn test_session_cap_evicts_oldest() -> Result<(), anyhow::Error> {
    let settings = CoreSettings {
        session: SessionConfig {
            max_concurrent_sessions: 2,
            ..SessionConfig::default()
        },
        ..common::settings()
    };
    let app = spawn_app_with(settings, |_| {});
    let first = register_alice(&app).await;

    let second = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;
    let third = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;

    let sessions = app.state.auth.list_sessions(first.user.id, None).await?;
    let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&first.session.id));
    assert!(ids.contains(&second.session.id));
    assert!(ids.contains(&third.session.id));

    let evicted = app
        .state
        .auth
        .authenticate(&Credential::SessionToken(first.session.token.clone()))
        .await;
    assert!(matches!(evicted, Err(AuthError::InvalidToken)));
    Ok(())
}

#[tokio::test]
async fn test_list_and_revoke_sessions() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let first = register_alice(&app).await;
    let second = app
        .state
        .auth
        .login(login_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await?;
    let user_id = first.user.id;

    let listed = app
        .state
        .auth
        .list_sessions(user_id, Some(second.session.id))
        .await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.iter().filter(|s| s.is_current).count(), 1);

    let foreign = app
        .state
        .auth
        .revoke_session(Uuid::new_v4(), first.session.id)
        .await;
    assert!(matches!(foreign, Err(AuthError::SessionNotFound)));

    app.state.auth.revoke_session(user_id, first.session.id).await?;
    assert_eq!(app.state.auth.list_sessions(user_id, None).await?.len(), 1);

    assert_eq!(app.state.auth.revoke_all_sessions(user_id).await?, 1);
    assert!(app.state.auth.list_sessions(user_id, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_session_cookie_authenticates() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    let context = app
        .state
        .auth
        .authenticate(&Credential::SessionToken(result.session.token.clone()))
        .await?;
    assert_eq!(context.user_id, result.user.id);
    assert_eq!(context.email.as_deref(), Some(ALICE_EMAIL));
    Ok(())
}

#[tokio::test]
async fn test_access_claims_carry_identity() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    let jwt = credential_service::services::JwtService::new(&common::settings().jwt)?;
    let envelope = jwt.validate::<AccessClaims>(&result.tokens.access_token)?;
    assert_eq!(envelope.sub, result.user.id.to_string());
    assert_eq!(envelope.claims.email, ALICE_EMAIL);
    assert_eq!(envelope.claims.sid, Some(result.session.id));
    assert!(!envelope.claims.scopes.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cleanup_sweeps_expired_sessions() -> Result<(), anyhow::Error> {
    let app = spawn_app();
    let result = register_alice(&app).await;

    let expired = Session::new(
        result.user.id,
        "expired-token".to_string(),
        Utc::now() - chrono::Duration::minutes(1),
        None,
        None,
    );
    app.store.create_session(&expired).await?;

    assert_eq!(app.state.auth.cleanup_expired_sessions().await?, 1);
    assert!(app.store.get_session(result.session.id).await.is_ok());
    Ok(())
}

/// Delegates to memory but refuses to create accounts.
struct AccountlessStore {
    inner: MemoryCredentialStore,
}

#[async_trait]
impl CredentialStore for AccountlessStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.create_session(session).await
    }
    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        self.inner.get_session(id).await
    }
    async fn get_session_by_token(&self, token: &str) -> Result<Session, StoreError> {
        self.inner.get_session_by_token(token).await
    }
    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.update_session(session).await
    }
    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.touch_session(id, at).await
    }
    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_session(id).await
    }
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        self.inner.list_sessions(user_id).await
    }
    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_user_sessions(user_id).await
    }
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_expired_sessions(now).await
    }
    async fn create_account(&self, _account: &Account) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("accounts table unavailable")))
    }
    async fn get_account_by_provider(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Account, StoreError> {
        self.inner
            .get_account_by_provider(provider_id, provider_account_id)
            .await
    }
    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner.update_account(account).await
    }
    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_account(id).await
    }
    async fn list_user_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        self.inner.list_user_accounts(user_id).await
    }
    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.inner.create_api_key(key).await
    }
    async fn get_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError> {
        self.inner.get_api_keys_by_prefix(prefix).await
    }
    async fn get_api_key(&self, id: Uuid) -> Result<ApiKey, StoreError> {
        self.inner.get_api_key(id).await
    }
    async fn list_user_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        self.inner.list_user_api_keys(user_id).await
    }
    async fn validate_api_key_hash(
        &self,
        prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey, StoreError> {
        self.inner.validate_api_key_hash(prefix, key_hash).await
    }
    async fn update_api_key_last_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.update_api_key_last_used(id, used_at).await
    }
    async fn delete_api_key(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_api_key(id).await
    }
}

#[tokio::test]
async fn test_failed_account_creation_removes_user() {
    let app = spawn_app_with(common::settings(), |backends| {
        backends.store = Arc::new(AccountlessStore {
            inner: MemoryCredentialStore::new(),
        });
    });

    let result = app
        .state
        .auth
        .register(register_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await;

    assert!(matches!(
        result,
        Err(AuthError::Storage {
            op: "create account",
            ..
        })
    ));
    assert!(app.users.get_user_by_email(ALICE_EMAIL).await.is_err());
    assert!(app
        .store
        .get_account_by_provider(LOCAL_PROVIDER, ALICE_EMAIL)
        .await
        .is_err());
}
