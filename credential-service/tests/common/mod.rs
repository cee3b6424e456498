//! Shared setup for integration tests, wired over the in-memory backends.

#![allow(dead_code)]

use credential_service::{
    config::{ApiKeyConfig, JwtConfig, OAuthConfig, SessionConfig},
    dtos::auth::{LoginRequest, RegisterRequest},
    services::{AuthResult, ClientInfo, MembershipRoles, MockMailSender},
    store::{MemoryCredentialStore, MemoryUserDirectory},
    AppState, Backends, CoreSettings,
};
use std::sync::Arc;
use std::time::Duration;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "Secure123!";

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryCredentialStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub mail: Arc<MockMailSender>,
    pub roles: Arc<MembershipRoles>,
}

pub fn settings() -> CoreSettings {
    CoreSettings {
        jwt: JwtConfig::new(JWT_SECRET),
        session: SessionConfig::default(),
        api_key: ApiKeyConfig::new("integration-hash-secret"),
        oauth: OAuthConfig::default(),
        telemetry_queue_capacity: 64,
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(settings(), |_| {})
}

/// Build an app, letting the caller swap backends before wiring.
pub fn spawn_app_with(settings: CoreSettings, customize: impl FnOnce(&mut Backends)) -> TestApp {
    let store = Arc::new(MemoryCredentialStore::new());
    let users = Arc::new(MemoryUserDirectory::new());
    let mail = Arc::new(MockMailSender::new());
    let roles = Arc::new(MembershipRoles::new());

    let mut backends = Backends::in_memory();
    backends.store = store.clone();
    backends.users = users.clone();
    backends.mail = mail.clone();
    backends.roles = roles.clone();
    customize(&mut backends);

    let state = AppState::build(backends, &settings).expect("Failed to build app state");
    TestApp {
        state,
        store,
        users,
        mail,
        roles,
    }
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip_address: Some("203.0.113.7".to_string()),
        user_agent: Some("integration-test".to_string()),
    }
}

pub fn register_request(email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        name: Some("Alice".to_string()),
    }
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        remember_me: false,
        organization_id: None,
    }
}

pub async fn register_alice(app: &TestApp) -> AuthResult {
    app.state
        .auth
        .register(register_request(ALICE_EMAIL, ALICE_PASSWORD), client())
        .await
        .expect("Failed to register alice")
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
