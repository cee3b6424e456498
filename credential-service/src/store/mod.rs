//! Durable persistence seams.
//!
//! [`CredentialStore`] owns sessions, accounts and API keys; [`UserDirectory`]
//! owns user identities. Both signal absence with [`StoreError::NotFound`] so
//! callers can tell "missing" apart from a backend failure.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, ApiKey, Session, User};

pub use memory::{MemoryCredentialStore, MemoryUserDirectory};
pub use postgres::{PgCredentialStore, PgUserDirectory};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Turns `NotFound` into `Ok(None)`, leaving real failures in place.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, StoreError> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError>;
    async fn get_session_by_token(&self, token: &str) -> Result<Session, StoreError>;
    /// Overwrites an existing row; never inserts.
    async fn update_session(&self, session: &Session) -> Result<(), StoreError>;
    /// Bumps `updated_at` only; expiry is left untouched.
    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError>;
    /// All sessions of a user, expired ones included.
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError>;
    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, StoreError>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;
    async fn get_account_by_provider(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Account, StoreError>;
    async fn update_account(&self, account: &Account) -> Result<(), StoreError>;
    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_user_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError>;

    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StoreError>;
    /// Keys whose display prefix matches; the prefix is not unique.
    async fn get_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError>;
    async fn get_api_key(&self, id: Uuid) -> Result<ApiKey, StoreError>;
    async fn list_user_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError>;
    async fn validate_api_key_hash(&self, prefix: &str, key_hash: &str)
        -> Result<ApiKey, StoreError>;
    async fn update_api_key_last_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn delete_api_key(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<User, StoreError>;
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    /// Set `email_verified` and return the updated user.
    async fn mark_email_verified(&self, id: Uuid) -> Result<User, StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;
}
