use service_core::error::AppError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::store::StoreError;

/// Failures talking to an OAuth provider. Surfaced as-is so operators can
/// tell an upstream outage apart from bad user input.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider response missing {0}")]
    MissingField(&'static str),

    #[error("provider does not support {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    UserExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid API key format")]
    InvalidApiKeyFormat,

    #[error("API key expired")]
    ApiKeyExpired,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Insufficient scopes")]
    InsufficientScopes,

    #[error("Unauthorized organization")]
    UnauthorizedOrganization,

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Password does not meet policy: {}", .0.join("; "))]
    WeakPassword(Vec<String>),

    #[error("Invalid OAuth state")]
    InvalidOAuthState,

    #[error("Unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Cannot remove the last authentication method")]
    LastAuthMethod,

    #[error("OAuth provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error during {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Cache error during {op}: {source}")]
    Cache {
        op: &'static str,
        #[source]
        source: CacheError,
    },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn storage(op: &'static str) -> impl FnOnce(StoreError) -> AuthError {
        move |source| AuthError::Storage { op, source }
    }

    pub fn cache(op: &'static str) -> impl FnOnce(CacheError) -> AuthError {
        move |source| AuthError::Cache { op, source }
    }

    /// Stable code for external callers.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::UserExists => "user_exists",
            AuthError::UserNotFound => "user_not_found",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidApiKeyFormat => "invalid_api_key_format",
            AuthError::ApiKeyExpired => "api_key_expired",
            AuthError::InvalidApiKey => "invalid_api_key",
            AuthError::InsufficientScopes => "insufficient_scopes",
            AuthError::UnauthorizedOrganization => "unauthorized_organization",
            AuthError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::InvalidOAuthState => "invalid_oauth_state",
            AuthError::UnknownProvider(_) => "unknown_provider",
            AuthError::AccountNotFound => "account_not_found",
            AuthError::LastAuthMethod => "last_auth_method",
            AuthError::Provider(_) => "provider_error",
            AuthError::Storage { .. } | AuthError::Cache { .. } | AuthError::Internal(_) => {
                "internal_error"
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            // Credential failures share one response so callers cannot tell
            // which check failed.
            AuthError::InvalidCredentials
            | AuthError::UserNotFound
            | AuthError::SessionNotFound
            | AuthError::SessionExpired
            | AuthError::InvalidToken
            | AuthError::InvalidApiKeyFormat
            | AuthError::ApiKeyExpired
            | AuthError::InvalidApiKey
            | AuthError::InvalidOAuthState => {
                AppError::Unauthorized(anyhow::anyhow!("Unauthorized"))
            }
            AuthError::TokenExpired => AppError::Unauthorized(anyhow::anyhow!("Token expired")),
            AuthError::UserExists => AppError::Conflict(anyhow::anyhow!("User already exists")),
            AuthError::InsufficientScopes => {
                AppError::Forbidden(anyhow::anyhow!("Insufficient scopes"))
            }
            AuthError::UnauthorizedOrganization => {
                AppError::Forbidden(anyhow::anyhow!("Unauthorized organization"))
            }
            AuthError::RateLimitExceeded { retry_after_secs } => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(retry_after_secs),
            ),
            AuthError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ AuthError::WeakPassword(_) => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            e @ AuthError::UnknownProvider(_) => {
                AppError::BadRequest(anyhow::anyhow!(e.to_string()))
            }
            AuthError::AccountNotFound => AppError::NotFound(anyhow::anyhow!("Account not found")),
            e @ AuthError::LastAuthMethod => AppError::Conflict(anyhow::anyhow!(e.to_string())),
            AuthError::Provider(e) => AppError::BadGateway(e.to_string()),
            e @ AuthError::Storage { .. } => {
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            }
            e @ AuthError::Cache { .. } => AppError::InternalError(anyhow::anyhow!(e.to_string())),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
