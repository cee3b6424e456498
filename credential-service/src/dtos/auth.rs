use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::ApiKeyInfo;
use crate::services::api_key::KeyEnvironment;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Strength rules are applied by the password policy, which reports every
    /// failed rule at once.
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[serde(default)]
    pub remember_me: bool,

    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyEnvironmentDto {
    #[default]
    Live,
    Test,
}

impl From<KeyEnvironmentDto> for KeyEnvironment {
    fn from(env: KeyEnvironmentDto) -> Self {
        match env {
            KeyEnvironmentDto::Live => KeyEnvironment::Live,
            KeyEnvironmentDto::Test => KeyEnvironment::Test,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    pub organization_id: Option<Uuid>,

    #[serde(default)]
    pub environment: KeyEnvironmentDto,

    #[validate(range(min = 1, max = 3650, message = "Expiry must be 1-3650 days"))]
    pub expires_in_days: Option<i64>,

    #[validate(range(min = 1, max = 100000, message = "Rate limit must be 1-100000 per minute"))]
    pub rate_limit: Option<i32>,
}

/// Carries the plaintext key; the only time it is ever returned.
#[derive(Debug, Clone, Serialize)]
pub struct CreateApiKeyResponse {
    pub key: String,
    #[serde(flatten)]
    pub info: ApiKeyInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyTokenResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
