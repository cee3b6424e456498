//! Session lifecycle over the credential store with an optional cache tier.
//!
//! The store is authoritative. Writes go to the store first and only then to
//! the cache; a failed store write never touches the cache. Sessions are
//! cached under two keys, `session_id:<id>` and `session_token:<token>`.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use super::error::AuthError;
use super::telemetry::{TelemetryJob, TelemetryQueue};
use crate::cache::JsonCache;
use crate::config::SessionConfig;
use crate::models::Session;
use crate::store::{CredentialStore, StoreError};
use crate::utils::token::random_token;

fn id_key(id: Uuid) -> String {
    format!("session_id:{}", id)
}

fn token_key(token: &str) -> String {
    format!("session_token:{}", token)
}

/// Lifetime left before `session` expires; zero once it has.
fn remaining(session: &Session) -> StdDuration {
    (session.expires_at - Utc::now())
        .to_std()
        .unwrap_or(StdDuration::ZERO)
}

fn session_store_error(op: &'static str) -> impl FnOnce(StoreError) -> AuthError {
    move |e| match e {
        StoreError::NotFound => AuthError::SessionNotFound,
        other => AuthError::Storage { op, source: other },
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    cache: Option<JsonCache>,
    telemetry: TelemetryQueue,
    ttl: Duration,
    refill_ttl: StdDuration,
    max_concurrent: usize,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Option<JsonCache>,
        telemetry: TelemetryQueue,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            cache,
            telemetry,
            ttl: Duration::hours(config.ttl_hours),
            refill_ttl: StdDuration::from_secs(config.cache_refill_ttl_seconds),
            max_concurrent: config.max_concurrent_sessions,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a new session and seed both cache keys.
    pub async fn create(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<Session, AuthError> {
        let mut session = Session::new(
            user_id,
            random_token(),
            Utc::now() + self.ttl,
            ip_address,
            user_agent,
        );
        session.active_organization_id = organization_id;

        self.store
            .create_session(&session)
            .await
            .map_err(AuthError::storage("create session"))?;

        self.cache_write(&session, self.ttl.to_std().unwrap_or(StdDuration::ZERO))
            .await;

        tracing::info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, AuthError> {
        if let Some(session) = self.cache_read(&id_key(id)).await {
            if !session.is_expired() {
                return Ok(session);
            }
            self.cache_purge(session.id, Some(&session.token)).await;
        }

        let session = self
            .store
            .get_session(id)
            .await
            .map_err(session_store_error("get session"))?;
        self.admit(session).await
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Session, AuthError> {
        if let Some(session) = self.cache_read(&token_key(token)).await {
            if !session.is_expired() {
                return Ok(session);
            }
            self.cache_purge(session.id, Some(&session.token)).await;
        }

        let session = self
            .store
            .get_session_by_token(token)
            .await
            .map_err(session_store_error("get session by token"))?;
        self.admit(session).await
    }

    /// Resolve a bearer session token and record activity in the background.
    pub async fn validate(&self, token: &str) -> Result<Session, AuthError> {
        let session = self.get_by_token(token).await?;
        self.telemetry.dispatch(TelemetryJob::SessionTouched {
            session_id: session.id,
            at: Utc::now(),
        });
        Ok(session)
    }

    /// Write `session` to the store, then refresh both cache keys.
    pub async fn update(&self, session: &Session) -> Result<(), AuthError> {
        self.store
            .update_session(session)
            .await
            .map_err(session_store_error("update session"))?;
        self.cache_write(session, remaining(session)).await;
        Ok(())
    }

    /// Slide expiry to now + TTL. An expired or missing session cannot be
    /// refreshed.
    pub async fn refresh(&self, id: Uuid) -> Result<Session, AuthError> {
        let mut session = self.get(id).await?;
        let now = Utc::now();
        session.expires_at = now + self.ttl;
        session.updated_at = now;
        self.update(&session).await?;

        tracing::debug!(session_id = %id, expires_at = %session.expires_at, "Session refreshed");
        Ok(session)
    }

    /// Switch the organization the session acts in. Membership is checked by
    /// the caller.
    pub(crate) async fn set_active_organization(
        &self,
        id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Session, AuthError> {
        let mut session = self.get(id).await?;
        session.active_organization_id = organization_id;
        session.updated_at = Utc::now();
        self.update(&session).await?;
        Ok(session)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        // The token key can only be purged if the token is known; learn it
        // from the cache, else from the store, else skip that key.
        let token = match self.cache_read(&id_key(id)).await {
            Some(session) => Some(session.token),
            None => self.store.get_session(id).await.ok().map(|s| s.token),
        };

        self.store
            .delete_session(id)
            .await
            .map_err(session_store_error("delete session"))?;
        self.cache_purge(id, token.as_deref()).await;

        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    /// Resolve and delete the session behind `token`.
    pub async fn delete_by_token(&self, token: &str) -> Result<Session, AuthError> {
        let session = self.get_by_token(token).await?;
        self.remove(&session).await?;
        tracing::info!(user_id = %session.user_id, session_id = %session.id, "Session deleted");
        Ok(session)
    }

    pub async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let sessions = self
            .store
            .list_sessions(user_id)
            .await
            .map_err(AuthError::storage("list sessions"))?;

        let deleted = self
            .store
            .delete_user_sessions(user_id)
            .await
            .map_err(AuthError::storage("delete user sessions"))?;

        for session in &sessions {
            self.cache_purge(session.id, Some(&session.token)).await;
        }

        tracing::info!(user_id = %user_id, deleted, "User sessions deleted");
        Ok(deleted)
    }

    /// Unexpired sessions of a user, oldest first.
    pub async fn list_user_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .store
            .list_sessions(user_id)
            .await
            .map_err(AuthError::storage("list sessions"))?
            .into_iter()
            .filter(|s| !s.is_expired_at(now))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// Make room for one more session under the per-user cap by evicting the
    /// oldest (earliest `created_at`, lowest id on ties).
    pub async fn enforce_session_cap(&self, user_id: Uuid) -> Result<(), AuthError> {
        if self.max_concurrent == 0 {
            return Ok(());
        }

        let active = self.list_user_sessions(user_id).await?;
        if active.len() < self.max_concurrent {
            return Ok(());
        }

        let excess = active.len() + 1 - self.max_concurrent;
        for session in active.iter().take(excess) {
            self.remove(session).await?;
            tracing::info!(
                user_id = %user_id,
                session_id = %session.id,
                "Evicted oldest session over concurrent-session cap"
            );
        }
        Ok(())
    }

    /// Store-only sweep; cached copies age out or are rejected on read.
    pub async fn delete_expired_sessions(&self) -> Result<u64, AuthError> {
        let deleted = self
            .store
            .delete_expired_sessions(Utc::now())
            .await
            .map_err(AuthError::storage("delete expired sessions"))?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired sessions swept");
        }
        Ok(deleted)
    }

    /// Return a store-read session, or lazily delete it if expired.
    async fn admit(&self, session: Session) -> Result<Session, AuthError> {
        if session.is_expired() {
            self.remove(&session).await?;
            tracing::debug!(session_id = %session.id, "Expired session removed on read");
            return Err(AuthError::SessionExpired);
        }

        self.cache_write(&session, remaining(&session).min(self.refill_ttl))
            .await;
        Ok(session)
    }

    /// Delete a known session from both tiers. Already gone counts as done.
    async fn remove(&self, session: &Session) -> Result<(), AuthError> {
        match self.store.delete_session(session.id).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "delete session",
                    source: e,
                })
            }
        }
        self.cache_purge(session.id, Some(&session.token)).await;
        Ok(())
    }

    async fn cache_read(&self, key: &str) -> Option<Session> {
        let cache = self.cache.as_ref()?;
        match cache.get::<Session>(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Session cache read failed");
                None
            }
        }
    }

    async fn cache_write(&self, session: &Session, ttl: StdDuration) {
        let Some(cache) = &self.cache else { return };
        for key in [id_key(session.id), token_key(&session.token)] {
            if let Err(e) = cache.set(&key, session, ttl).await {
                tracing::warn!(session_id = %session.id, error = %e, "Session cache write failed");
            }
        }
    }

    async fn cache_purge(&self, id: Uuid, token: Option<&str>) {
        let Some(cache) = &self.cache else { return };
        let mut keys = vec![id_key(id)];
        if let Some(token) = token {
            keys.push(token_key(token));
        }
        for key in keys {
            if let Err(e) = cache.delete(&key).await {
                tracing::warn!(session_id = %id, error = %e, "Session cache purge failed");
            }
        }
    }
}
