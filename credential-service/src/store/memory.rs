//! In-process backends for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CredentialStore, StoreError, UserDirectory};
use crate::models::{Account, ApiKey, Session, User};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    session_tokens: HashMap<String, Uuid>,
    accounts: HashMap<Uuid, Account>,
    api_keys: HashMap<Uuid, ApiKey>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: Mutex<Tables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("credential store poisoned: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.sessions.contains_key(&session.id)
            || tables.session_tokens.contains_key(&session.token)
        {
            return Err(StoreError::Conflict("session already exists".to_string()));
        }
        tables
            .session_tokens
            .insert(session.token.clone(), session.id);
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        self.lock()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_session_by_token(&self, token: &str) -> Result<Session, StoreError> {
        let tables = self.lock()?;
        tables
            .session_tokens
            .get(token)
            .and_then(|id| tables.sessions.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = tables.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.updated_at = at;
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let session = tables.sessions.remove(&id).ok_or(StoreError::NotFound)?;
        tables.session_tokens.remove(&session.token);
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let ids: Vec<Uuid> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        for id in &ids {
            if let Some(session) = tables.sessions.remove(id) {
                tables.session_tokens.remove(&session.token);
            }
        }
        Ok(ids.len() as u64)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let expired: Vec<Uuid> = tables
            .sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            if let Some(session) = tables.sessions.remove(id) {
                tables.session_tokens.remove(&session.token);
            }
        }
        Ok(expired.len() as u64)
    }

    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let duplicate = tables.accounts.values().any(|a| {
            (a.provider_id == account.provider_id
                && a.provider_account_id == account.provider_account_id)
                || (account.is_local() && a.is_local() && a.user_id == account.user_id)
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "{} account already linked",
                account.provider_id
            )));
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account_by_provider(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Account, StoreError> {
        self.lock()?
            .accounts
            .values()
            .find(|a| a.provider_id == provider_id && a.provider_account_id == provider_account_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?
            .accounts
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list_user_accounts(&self, user_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .lock()?
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(accounts)
    }

    async fn create_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("api key hash collision".to_string()));
        }
        tables.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self
            .lock()?
            .api_keys
            .values()
            .filter(|k| k.prefix == prefix)
            .cloned()
            .collect())
    }

    async fn get_api_key(&self, id: Uuid) -> Result<ApiKey, StoreError> {
        self.lock()?
            .api_keys
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_user_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        let mut keys: Vec<ApiKey> = self
            .lock()?
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    async fn validate_api_key_hash(
        &self,
        prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey, StoreError> {
        self.lock()?
            .api_keys
            .values()
            .find(|k| k.prefix == prefix && k.key_hash == key_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_api_key_last_used(
        &self,
        id: Uuid,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let key = tables.api_keys.get_mut(&id).ok_or(StoreError::NotFound)?;
        key.last_used_at = Some(used_at);
        Ok(())
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?
            .api_keys
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, User>>, StoreError> {
        self.users
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("user directory poisoned: {}", e)))
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.lock()?
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.lock()?.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.lock()?;
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<User, StoreError> {
        let mut users = self.lock()?;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.email_verified = true;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        self.lock()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}
