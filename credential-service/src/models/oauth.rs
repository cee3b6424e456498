//! Shapes exchanged with OAuth providers and the pending-flow state record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending authorization flow, keyed by its random `state` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    pub state: String,
    pub provider: String,
    pub redirect_uri: String,
    /// PKCE verifier whose S256 challenge went into the authorization URL.
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token set returned by a provider's token endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

/// Normalized identity returned by a provider's user-info endpoint.
#[derive(Debug, Clone)]
pub struct ProviderUserInfo {
    pub provider_account_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}
