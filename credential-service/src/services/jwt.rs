use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::error::AuthError;
use crate::config::JwtConfig;

/// Discriminator carried in every token; validation rejects a token whose
/// type differs from the one requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    Session,
    ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "oauth")]
    OAuth,
    #[serde(rename = "api_key")]
    ApiKey,
    #[serde(rename = "mfa")]
    Mfa,
}

/// A claim body with a fixed token type.
pub trait TokenClaims: Serialize + DeserializeOwned {
    const TOKEN_TYPE: TokenType;
}

/// Registered claims shared by every token, with the typed body flattened in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<C> {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub token_type: TokenType,
    #[serde(flatten)]
    pub claims: C,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub uid: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_role: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl TokenClaims for AccessClaims {
    const TOKEN_TYPE: TokenType = TokenType::Access;
}

/// Refresh claims carry only what is needed to reissue; everything else is
/// reloaded from the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub uid: Uuid,
    pub sid: Uuid,
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub extended: bool,
}

impl TokenClaims for RefreshClaims {
    const TOKEN_TYPE: TokenType = TokenType::Refresh;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub uid: Uuid,
    pub sid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
}

impl TokenClaims for SessionClaims {
    const TOKEN_TYPE: TokenType = TokenType::Session;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyClaims {
    pub kid: Uuid,
    pub uid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub rate_limit: i32,
}

impl TokenClaims for ApiKeyClaims {
    const TOKEN_TYPE: TokenType = TokenType::ApiKey;
}

/// Refresh lifetime chosen at login; "remember me" takes the extended one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshLifetime {
    Standard,
    Extended,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

/// HS256 token issuer and validator.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    extended_refresh_ttl: Duration,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, AuthError> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.len() < 32 {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "JWT secret must be at least 32 bytes"
            )));
        }

        tracing::info!(issuer = %config.issuer, "JWT service initialized with HS256 secret");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
            extended_refresh_ttl: Duration::days(config.extended_refresh_token_expiry_days),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self, lifetime: RefreshLifetime) -> Duration {
        match lifetime {
            RefreshLifetime::Standard => self.refresh_ttl,
            RefreshLifetime::Extended => self.extended_refresh_ttl,
        }
    }

    /// Sign `claims` for `subject`, valid from now for `ttl`.
    pub fn issue<C: TokenClaims>(
        &self,
        subject: Uuid,
        claims: C,
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let envelope = Envelope {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: C::TOKEN_TYPE,
            claims,
        };

        let token = encode(&Header::new(Algorithm::HS256), &envelope, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {:?} token: {}", C::TOKEN_TYPE, e))?;

        Ok(IssuedToken {
            token,
            jti: envelope.jti,
            expires_at,
        })
    }

    /// Verify signature, algorithm, issuer, `nbf` and `exp`, then require the
    /// token type of `C`.
    pub fn validate<C: TokenClaims>(&self, token: &str) -> Result<Envelope<C>, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        let data = decode::<Envelope<C>>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => {
                    tracing::debug!(error = %e, "Token rejected");
                    AuthError::InvalidToken
                }
            }
        })?;

        if data.claims.token_type != C::TOKEN_TYPE {
            tracing::debug!(
                expected = ?C::TOKEN_TYPE,
                actual = ?data.claims.token_type,
                "Token type mismatch"
            );
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims)
    }

    /// Issue an access token plus a refresh token bound to session `sid`.
    pub fn issue_token_pair(
        &self,
        access: AccessClaims,
        sid: Uuid,
        lifetime: RefreshLifetime,
    ) -> Result<TokenPair, AuthError> {
        let uid = access.uid;
        let refresh = RefreshClaims {
            uid,
            sid,
            auth_method: access.auth_method,
            provider: access.provider.clone(),
            extended: lifetime == RefreshLifetime::Extended,
        };

        let access_token = self.issue(uid, access, self.access_ttl)?;
        let refresh_token = self.issue(uid, refresh, self.refresh_ttl(lifetime))?;

        Ok(TokenPair {
            access_token: access_token.token,
            refresh_token: refresh_token.token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_at: refresh_token.expires_at,
        })
    }
}
