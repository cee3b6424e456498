//! Account model - links a user to one authentication method.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::oauth::ProviderTokens;

/// Provider id of password-based accounts.
pub const LOCAL_PROVIDER: &str = "local";

/// One authentication method of a user. Only `local` accounts carry a
/// password hash; OAuth accounts carry provider tokens instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_id: String,
    pub provider_account_id: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing)]
    pub id_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Password account; the local provider account id is the email.
    pub fn new_local(user_id: Uuid, email: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider_id: LOCAL_PROVIDER.to_string(),
            provider_account_id: email.to_string(),
            password_hash: Some(password_hash),
            access_token: None,
            refresh_token: None,
            id_token: None,
            access_token_expires_at: None,
            scope: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_oauth(
        user_id: Uuid,
        provider_id: &str,
        provider_account_id: &str,
        tokens: &ProviderTokens,
    ) -> Self {
        let now = Utc::now();
        let mut account = Self {
            id: Uuid::new_v4(),
            user_id,
            provider_id: provider_id.to_string(),
            provider_account_id: provider_account_id.to_string(),
            password_hash: None,
            access_token: None,
            refresh_token: None,
            id_token: None,
            access_token_expires_at: None,
            scope: None,
            created_at: now,
            updated_at: now,
        };
        account.apply_tokens(tokens);
        account
    }

    /// Overwrite provider tokens; a missing refresh token keeps the old one.
    pub fn apply_tokens(&mut self, tokens: &ProviderTokens) {
        self.access_token = Some(tokens.access_token.clone());
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token.clone();
        }
        if tokens.id_token.is_some() {
            self.id_token = tokens.id_token.clone();
        }
        self.access_token_expires_at = tokens.expires_at;
        if tokens.scope.is_some() {
            self.scope = tokens.scope.clone();
        }
        self.updated_at = Utc::now();
    }

    pub fn is_local(&self) -> bool {
        self.provider_id == LOCAL_PROVIDER
    }
}
