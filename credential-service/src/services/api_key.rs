//! Opaque API keys: `sk_live_`/`sk_test_` followed by 64 hex characters.
//!
//! Only an HMAC-SHA256 of the key is stored. The 8-character prefix is the
//! environment tag itself, so it narrows a lookup but never identifies a key.

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::rate_limit::ApiKeyRateLimiter;
use super::telemetry::{TelemetryJob, TelemetryQueue};
use crate::cache::JsonCache;
use crate::config::ApiKeyConfig;
use crate::models::{ApiKey, ApiKeyInfo};
use crate::store::{CredentialStore, StoreError};
use crate::utils::token::{constant_time_eq, random_bytes};

type HmacSha256 = Hmac<Sha256>;

pub const LIVE_PREFIX: &str = "sk_live_";
pub const TEST_PREFIX: &str = "sk_test_";
pub const PREFIX_LEN: usize = 8;
const SECRET_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEnvironment {
    #[default]
    Live,
    Test,
}

impl KeyEnvironment {
    pub fn tag(self) -> &'static str {
        match self {
            KeyEnvironment::Live => LIVE_PREFIX,
            KeyEnvironment::Test => TEST_PREFIX,
        }
    }
}

/// A fresh key and its lookup prefix.
pub fn generate_api_key(environment: KeyEnvironment) -> (String, String) {
    let key = format!("{}{}", environment.tag(), hex::encode(random_bytes(32)));
    let prefix = key[..PREFIX_LEN].to_string();
    (key, prefix)
}

/// Shape check only; never touches storage.
pub fn validate_format(key: &str) -> Result<(), AuthError> {
    let secret = key
        .strip_prefix(LIVE_PREFIX)
        .or_else(|| key.strip_prefix(TEST_PREFIX))
        .ok_or(AuthError::InvalidApiKeyFormat)?;

    if secret.len() != SECRET_HEX_LEN || !secret.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AuthError::InvalidApiKeyFormat);
    }
    Ok(())
}

/// Pull a key out of an `Authorization` value: `ApiKey <key>`,
/// `Bearer sk_...`, or a bare `sk_...`.
pub fn parse_api_key_header(value: &str) -> Option<&str> {
    let value = value.trim();
    if let Some(key) = value.strip_prefix("ApiKey ") {
        let key = key.trim();
        return (!key.is_empty()).then_some(key);
    }
    if let Some(token) = value.strip_prefix("Bearer ") {
        let token = token.trim();
        return token.starts_with("sk_").then_some(token);
    }
    value.starts_with("sk_").then_some(value)
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub scopes: Vec<String>,
    pub environment: KeyEnvironment,
    /// Requests per minute; the configured default when absent.
    pub rate_limit: Option<i32>,
    /// Lifetime; the configured default when absent.
    pub ttl: Option<Duration>,
}

/// Returned once at creation. `key` is not recoverable afterwards.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub key: String,
    pub record: ApiKey,
}

fn cache_key(prefix: &str, key_hash: &str) -> String {
    format!("apikey:{}:{}", prefix, key_hash)
}

#[derive(Clone)]
pub struct ApiKeyManager {
    store: Arc<dyn CredentialStore>,
    cache: Option<JsonCache>,
    telemetry: TelemetryQueue,
    rate_limiter: Arc<dyn ApiKeyRateLimiter>,
    hash_secret: SecretString,
    default_rate_limit: i32,
    default_ttl: Duration,
}

impl ApiKeyManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Option<JsonCache>,
        telemetry: TelemetryQueue,
        rate_limiter: Arc<dyn ApiKeyRateLimiter>,
        config: &ApiKeyConfig,
    ) -> Self {
        Self {
            store,
            cache,
            telemetry,
            rate_limiter,
            hash_secret: config.hash_secret.clone(),
            default_rate_limit: i32::try_from(config.default_rate_limit).unwrap_or(i32::MAX),
            default_ttl: Duration::days(config.default_expiry_days),
        }
    }

    fn hash(&self, key: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.hash_secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid API key hash secret: {}", e))?;
        mac.update(key.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub async fn create(&self, request: NewApiKey) -> Result<CreatedApiKey, AuthError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidRequest("API key name is required".into()));
        }
        let ttl = request.ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(AuthError::InvalidRequest(
                "API key lifetime must be positive".into(),
            ));
        }

        let (key, prefix) = generate_api_key(request.environment);
        let now = Utc::now();
        let record = ApiKey {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            organization_id: request.organization_id,
            name: name.to_string(),
            key_hash: self.hash(&key)?,
            prefix,
            scopes: request.scopes,
            rate_limit: request.rate_limit.unwrap_or(self.default_rate_limit),
            expires_at: now + ttl,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store
            .create_api_key(&record)
            .await
            .map_err(AuthError::storage("create api key"))?;

        tracing::info!(
            user_id = %record.user_id,
            key_id = %record.id,
            prefix = %record.prefix,
            "API key created"
        );
        Ok(CreatedApiKey { key, record })
    }

    /// Resolve a presented key. Malformed input is rejected before any
    /// lookup; an expired key is reported as expired, not as unknown.
    pub async fn validate(&self, key: &str) -> Result<ApiKey, AuthError> {
        validate_format(key)?;
        let prefix = &key[..PREFIX_LEN];
        let key_hash = self.hash(key)?;
        let cache_key = cache_key(prefix, &key_hash);

        let record = match self.cache_read(&cache_key, &key_hash).await {
            Some(record) => record,
            None => {
                let record = self
                    .store
                    .validate_api_key_hash(prefix, &key_hash)
                    .await
                    .map_err(|e| match e {
                        StoreError::NotFound => AuthError::InvalidApiKey,
                        other => AuthError::Storage {
                            op: "validate api key",
                            source: other,
                        },
                    })?;
                if record.is_expired() {
                    tracing::debug!(key_id = %record.id, "Expired API key presented");
                    return Err(AuthError::ApiKeyExpired);
                }
                self.cache_write(&cache_key, &record).await;
                record
            }
        };

        self.rate_limiter.check(&record)?;

        self.telemetry.dispatch(TelemetryJob::ApiKeyUsed {
            key_id: record.id,
            at: Utc::now(),
        });
        Ok(record)
    }

    /// Delete a key owned by `user_id`. Someone else's key looks the same as a
    /// missing one.
    pub async fn revoke(&self, user_id: Uuid, key_id: Uuid) -> Result<(), AuthError> {
        let record = match self.store.get_api_key(key_id).await {
            Ok(record) if record.user_id == user_id => record,
            Ok(_) | Err(StoreError::NotFound) => return Err(AuthError::InvalidApiKey),
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get api key",
                    source: e,
                })
            }
        };

        self.store
            .delete_api_key(record.id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AuthError::InvalidApiKey,
                other => AuthError::Storage {
                    op: "delete api key",
                    source: other,
                },
            })?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&cache_key(&record.prefix, &record.key_hash)).await {
                tracing::warn!(key_id = %record.id, error = %e, "API key cache purge failed");
            }
        }

        tracing::info!(user_id = %user_id, key_id = %key_id, "API key revoked");
        Ok(())
    }

    pub async fn list_user_keys(&self, user_id: Uuid) -> Result<Vec<ApiKeyInfo>, AuthError> {
        let mut keys = self
            .store
            .list_user_api_keys(user_id)
            .await
            .map_err(AuthError::storage("list api keys"))?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys.into_iter().map(ApiKeyInfo::from).collect())
    }

    async fn cache_read(&self, cache_key: &str, key_hash: &str) -> Option<ApiKey> {
        let cache = self.cache.as_ref()?;
        let record = match cache.get::<ApiKey>(cache_key).await {
            Ok(hit) => hit?,
            Err(e) => {
                tracing::warn!(error = %e, "API key cache read failed");
                return None;
            }
        };

        if !constant_time_eq(&record.key_hash, key_hash) {
            return None;
        }
        if record.is_expired() {
            if let Err(e) = cache.delete(cache_key).await {
                tracing::warn!(key_id = %record.id, error = %e, "API key cache purge failed");
            }
            return None;
        }
        Some(record)
    }

    async fn cache_write(&self, cache_key: &str, record: &ApiKey) {
        let Some(cache) = &self.cache else { return };
        let ttl = (record.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        if let Err(e) = cache.set(cache_key, record, ttl).await {
            tracing::warn!(key_id = %record.id, error = %e, "API key cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCache};
    use crate::services::rate_limit::{GovernorRateLimiter, Unlimited};
    use crate::store::MemoryCredentialStore;

    struct Fixture {
        store: Arc<MemoryCredentialStore>,
        cache: Arc<MemoryCache>,
        manager: ApiKeyManager,
    }

    fn fixture(rate_limiter: Arc<dyn ApiKeyRateLimiter>) -> Fixture {
        let store = Arc::new(MemoryCredentialStore::new());
        let cache = Arc::new(MemoryCache::new());
        let manager = ApiKeyManager::new(
            store.clone(),
            Some(JsonCache::new(cache.clone())),
            TelemetryQueue::spawn(store.clone(), 16),
            rate_limiter,
            &ApiKeyConfig::new("test-hash-secret"),
        );
        Fixture {
            store,
            cache,
            manager,
        }
    }

    fn request(user_id: Uuid) -> NewApiKey {
        NewApiKey {
            user_id,
            organization_id: None,
            name: "ci".to_string(),
            scopes: vec!["read:content".to_string()],
            environment: KeyEnvironment::Live,
            rate_limit: None,
            ttl: Some(Duration::hours(1)),
        }
    }

    #[test]
    fn test_generated_keys_pass_format_check() {
        for env in [KeyEnvironment::Live, KeyEnvironment::Test] {
            let (key, prefix) = generate_api_key(env);
            assert!(validate_format(&key).is_ok());
            assert_eq!(key.len(), PREFIX_LEN + SECRET_HEX_LEN);
            assert_eq!(prefix, env.tag());
        }
    }

    #[test]
    fn test_format_rejections() {
        let hex64 = "a".repeat(64);
        for bad in [
            String::new(),
            format!("sk_prod_{}", hex64),
            format!("sk_live_{}", "a".repeat(63)),
            format!("sk_live_{}", "g".repeat(64)),
            format!("pk_live_{}", hex64),
        ] {
            assert!(matches!(
                validate_format(&bad),
                Err(AuthError::InvalidApiKeyFormat)
            ));
        }
    }

    #[test]
    fn test_parse_header_variants() {
        assert_eq!(parse_api_key_header("ApiKey sk_live_abc"), Some("sk_live_abc"));
        assert_eq!(parse_api_key_header("Bearer sk_test_abc"), Some("sk_test_abc"));
        assert_eq!(parse_api_key_header("sk_live_abc"), Some("sk_live_abc"));
        assert_eq!(parse_api_key_header("Bearer eyJhbGciOi"), None);
        assert_eq!(parse_api_key_header("ApiKey "), None);
    }

    #[tokio::test]
    async fn test_create_stores_only_the_hash() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let created = f.manager.create(request(Uuid::new_v4())).await?;

        let stored = f.store.get_api_key(created.record.id).await?;
        assert_ne!(stored.key_hash, created.key);
        assert!(!stored.key_hash.contains(&created.key[PREFIX_LEN..]));
        assert_eq!(stored.rate_limit, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_validate_populates_cache() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let created = f.manager.create(request(Uuid::new_v4())).await?;
        assert!(f.cache.is_empty());

        let first = f.manager.validate(&created.key).await?;
        assert_eq!(first.id, created.record.id);
        assert_eq!(f.cache.len(), 1);

        let second = f.manager.validate(&created.key).await?;
        assert_eq!(second.id, created.record.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_key_is_invalid() {
        let f = fixture(Arc::new(Unlimited));
        let (key, _) = generate_api_key(KeyEnvironment::Test);
        assert!(matches!(
            f.manager.validate(&key).await,
            Err(AuthError::InvalidApiKey)
        ));
    }

    #[tokio::test]
    async fn test_expired_key_reports_expired() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let created = f.manager.create(request(Uuid::new_v4())).await?;

        let mut record = f.store.get_api_key(created.record.id).await?;
        record.expires_at = Utc::now() - Duration::seconds(1);
        f.store.delete_api_key(record.id).await?;
        f.store.create_api_key(&record).await?;

        assert!(matches!(
            f.manager.validate(&created.key).await,
            Err(AuthError::ApiKeyExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_revoked_key_fails_despite_warm_cache() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let user_id = Uuid::new_v4();
        let created = f.manager.create(request(user_id)).await?;
        f.manager.validate(&created.key).await?;

        f.manager.revoke(user_id, created.record.id).await?;

        assert!(f.cache.is_empty());
        assert!(matches!(
            f.manager.validate(&created.key).await,
            Err(AuthError::InvalidApiKey)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_revoke_requires_owner() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let created = f.manager.create(request(Uuid::new_v4())).await?;

        let result = f.manager.revoke(Uuid::new_v4(), created.record.id).await;

        assert!(matches!(result, Err(AuthError::InvalidApiKey)));
        assert!(f.store.get_api_key(created.record.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_limit_applies_after_validation() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(GovernorRateLimiter::new()));
        let created = f
            .manager
            .create(NewApiKey {
                rate_limit: Some(2),
                ..request(Uuid::new_v4())
            })
            .await?;

        f.manager.validate(&created.key).await?;
        f.manager.validate(&created.key).await?;
        assert!(matches!(
            f.manager.validate(&created.key).await,
            Err(AuthError::RateLimitExceeded { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let f = fixture(Arc::new(Unlimited));
        let result = f
            .manager
            .create(NewApiKey {
                name: "  ".into(),
                ..request(Uuid::new_v4())
            })
            .await;
        assert!(matches!(result, Err(AuthError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_list_hides_hashes() -> Result<(), anyhow::Error> {
        let f = fixture(Arc::new(Unlimited));
        let user_id = Uuid::new_v4();
        f.manager.create(request(user_id)).await?;
        f.manager.create(request(user_id)).await?;

        let keys = f.manager.list_user_keys(user_id).await?;
        assert_eq!(keys.len(), 2);
        let json = serde_json::to_string(&keys)?;
        assert!(!json.contains("key_hash"));
        Ok(())
    }
}
