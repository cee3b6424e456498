use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::cache::JsonCache;
use crate::models::OAuthState;
use crate::services::error::AuthError;
use crate::utils::token::random_token;

fn state_key(state: &str) -> String {
    format!("oauthstate:{}", state)
}

/// S256 PKCE challenge for `verifier`.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Pending authorization flows, kept in the cache tier so any instance can
/// finish a flow another one started. Each entry can be consumed once.
#[derive(Clone)]
pub struct OAuthStateStore {
    cache: JsonCache,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(cache: JsonCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn issue(&self, provider: &str, redirect_uri: &str) -> Result<OAuthState, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| anyhow::anyhow!("Invalid OAuth state TTL: {}", e))?;
        let state = OAuthState {
            state: random_token(),
            provider: provider.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code_verifier: random_token(),
            created_at: now,
            expires_at: now + ttl,
        };

        self.cache
            .set(&state_key(&state.state), &state, self.ttl)
            .await
            .map_err(AuthError::cache("store oauth state"))?;
        Ok(state)
    }

    /// Remove and return the flow for `state`. Unknown, expired or already
    /// used values are all `InvalidOAuthState`.
    pub async fn consume(&self, state: &str) -> Result<OAuthState, AuthError> {
        let stored = self
            .cache
            .take::<OAuthState>(&state_key(state))
            .await
            .map_err(AuthError::cache("consume oauth state"))?
            .ok_or(AuthError::InvalidOAuthState)?;

        if stored.expires_at <= Utc::now() {
            return Err(AuthError::InvalidOAuthState);
        }
        Ok(stored)
    }

    /// Best-effort removal used when a callback is rejected before consuming.
    pub async fn discard(&self, state: &str) {
        if let Err(e) = self.cache.delete(&state_key(state)).await {
            tracing::error!(error = %e, "Failed to delete OAuth state");
        }
    }
}
