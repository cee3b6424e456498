//! Single-use email verification tokens held in the cache tier.
//!
//! Each token lives under `emailverify:<token>`. The latest token per user
//! is indexed under `emailverify_user:<id>` so a resend retires the old one.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::JsonCache;
use crate::models::User;
use crate::services::error::AuthError;
use crate::utils::token::random_token;

pub const VERIFICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn token_key(token: &str) -> String {
    format!("emailverify:{}", token)
}

fn user_key(user_id: Uuid) -> String {
    format!("emailverify_user:{}", user_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVerification {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Clone)]
pub struct VerificationTokens {
    cache: JsonCache,
    ttl: Duration,
}

impl VerificationTokens {
    pub fn new(cache: JsonCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Mint a token for `user`, retiring any token issued earlier.
    pub async fn issue(&self, user: &User) -> Result<String, AuthError> {
        let index = user_key(user.id);
        if let Some(previous) = self
            .cache
            .take::<String>(&index)
            .await
            .map_err(AuthError::cache("read verification index"))?
        {
            self.cache
                .delete(&token_key(&previous))
                .await
                .map_err(AuthError::cache("retire verification token"))?;
        }

        let token = random_token();
        let pending = PendingVerification {
            user_id: user.id,
            email: user.email.clone(),
        };
        self.cache
            .set(&token_key(&token), &pending, self.ttl)
            .await
            .map_err(AuthError::cache("store verification token"))?;
        self.cache
            .set(&index, &token, self.ttl)
            .await
            .map_err(AuthError::cache("store verification index"))?;
        Ok(token)
    }

    /// Remove and return the pending verification. Unknown, expired and used
    /// tokens are all `InvalidToken`.
    pub async fn consume(&self, token: &str) -> Result<PendingVerification, AuthError> {
        let pending = self
            .cache
            .take::<PendingVerification>(&token_key(token))
            .await
            .map_err(AuthError::cache("consume verification token"))?
            .ok_or(AuthError::InvalidToken)?;

        if let Err(e) = self.cache.delete(&user_key(pending.user_id)).await {
            tracing::warn!(
                user_id = %pending.user_id,
                error = %e,
                "Failed to clear verification index"
            );
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::Arc;

    fn tokens(ttl: Duration) -> VerificationTokens {
        VerificationTokens::new(JsonCache::new(Arc::new(MemoryCache::new())), ttl)
    }

    fn user() -> User {
        User::new("dave@example.com".to_string(), None, false)
    }

    #[tokio::test]
    async fn test_token_is_single_use() -> Result<(), AuthError> {
        let tokens = tokens(VERIFICATION_TTL);
        let user = user();
        let token = tokens.issue(&user).await?;

        let pending = tokens.consume(&token).await?;
        assert_eq!(pending.user_id, user.id);
        assert_eq!(pending.email, user.email);
        assert!(matches!(tokens.consume(&token).await, Err(AuthError::InvalidToken)));
        Ok(())
    }

    #[tokio::test]
    async fn test_reissue_retires_previous_token() -> Result<(), AuthError> {
        let tokens = tokens(VERIFICATION_TTL);
        let user = user();
        let first = tokens.issue(&user).await?;
        let second = tokens.issue(&user).await?;

        assert_ne!(first, second);
        assert!(matches!(tokens.consume(&first).await, Err(AuthError::InvalidToken)));
        tokens.consume(&second).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_token_rejected() -> Result<(), AuthError> {
        let tokens = tokens(Duration::from_millis(20));
        let token = tokens.issue(&user()).await?;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(tokens.consume(&token).await, Err(AuthError::InvalidToken)));
        Ok(())
    }
}
