pub mod cache;
pub mod config;
pub mod db;
pub mod dtos;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, JsonCache, MemoryCache};
use crate::config::{ApiKeyConfig, AuthConfig, JwtConfig, OAuthConfig, SessionConfig};
use crate::services::{
    ApiKeyManager, ApiKeyRateLimiter, AuthError, AuthService, CredentialIssuer, GovernorRateLimiter,
    JwtService, LockoutPolicy, LogMailSender, MailSender, MembershipRoles, NoLockout,
    OAuthOrchestrator, OAuthProvider, OAuthStateStore, RoleResolver, SessionManager,
    TelemetryQueue, VerificationTokens, VERIFICATION_TTL,
};
use crate::store::{CredentialStore, MemoryCredentialStore, MemoryUserDirectory, UserDirectory};

/// Swappable collaborators, chosen at composition time.
pub struct Backends {
    pub store: Arc<dyn CredentialStore>,
    pub users: Arc<dyn UserDirectory>,
    /// `None` runs sessions and API keys straight against the store.
    pub cache: Option<Arc<dyn CacheStore>>,
    pub mail: Arc<dyn MailSender>,
    pub lockout: Arc<dyn LockoutPolicy>,
    pub roles: Arc<dyn RoleResolver>,
    pub rate_limiter: Arc<dyn ApiKeyRateLimiter>,
    pub oauth_providers: Vec<Arc<dyn OAuthProvider>>,
}

impl Backends {
    /// Single-process backends with default hooks.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryCredentialStore::new()),
            users: Arc::new(MemoryUserDirectory::new()),
            cache: Some(Arc::new(MemoryCache::new())),
            mail: Arc::new(LogMailSender),
            lockout: Arc::new(NoLockout),
            roles: Arc::new(MembershipRoles::new()),
            rate_limiter: Arc::new(GovernorRateLimiter::new()),
            oauth_providers: Vec::new(),
        }
    }
}

/// The parts of [`AuthConfig`] the authentication core reads.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    pub api_key: ApiKeyConfig,
    pub oauth: OAuthConfig,
    pub telemetry_queue_capacity: usize,
}

impl From<&AuthConfig> for CoreSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            jwt: config.jwt.clone(),
            session: config.session.clone(),
            api_key: config.api_key.clone(),
            oauth: config.oauth.clone(),
            telemetry_queue_capacity: config.telemetry_queue_capacity,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub oauth: OAuthOrchestrator,
    pub session_cookie: String,
    pub cache: Option<Arc<dyn CacheStore>>,
}

impl AppState {
    /// Wire the services over `backends`. Must run inside a Tokio runtime;
    /// the telemetry worker is spawned here.
    pub fn build(backends: Backends, settings: &CoreSettings) -> Result<Self, AuthError> {
        let Backends {
            store,
            users,
            cache,
            mail,
            lockout,
            roles,
            rate_limiter,
            oauth_providers,
        } = backends;

        let telemetry = TelemetryQueue::spawn(store.clone(), settings.telemetry_queue_capacity);
        let json_cache = cache.clone().map(JsonCache::new);

        let sessions = SessionManager::new(
            store.clone(),
            json_cache.clone(),
            telemetry.clone(),
            &settings.session,
        );
        let jwt = JwtService::new(&settings.jwt)?;
        let issuer = CredentialIssuer::new(sessions, jwt, roles);

        let api_keys = ApiKeyManager::new(
            store.clone(),
            json_cache,
            telemetry,
            rate_limiter,
            &settings.api_key,
        );

        let state_cache: Arc<dyn CacheStore> = match &cache {
            Some(cache) => cache.clone(),
            None => {
                tracing::warn!("No shared cache configured; pending tokens are process-local");
                Arc::new(MemoryCache::new())
            }
        };
        let verification = VerificationTokens::new(
            JsonCache::new(state_cache.clone()),
            VERIFICATION_TTL,
        );
        let states = OAuthStateStore::new(
            JsonCache::new(state_cache),
            Duration::from_secs(settings.oauth.state_ttl_seconds),
        );
        let oauth = OAuthOrchestrator::new(
            oauth_providers,
            states,
            store.clone(),
            users.clone(),
            issuer.clone(),
            Duration::from_secs(settings.oauth.provider_timeout_seconds),
        );

        let auth = AuthService::new(users, store, issuer, api_keys, lockout, mail, verification);

        Ok(Self {
            auth,
            oauth,
            session_cookie: settings.session.cookie_name.clone(),
            cache,
        })
    }
}
