use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::api_key::{ApiKeyManager, NewApiKey};
use super::compensation::UserCompensation;
use super::context::AuthContext;
use super::email::MailSender;
use super::error::AuthError;
use super::hooks::{LockoutPolicy, LoginAttempt};
use super::issuance::{AuthResult, ClientInfo, CredentialIssuer};
use super::jwt::{
    AccessClaims, ApiKeyClaims, AuthMethod, IssuedToken, RefreshClaims, RefreshLifetime,
    TokenPair,
};
use super::permissions::API_KEY_SCOPES;
use super::policy::PasswordPolicy;
use super::session::SessionManager;
use super::verification::VerificationTokens;
use crate::dtos::auth::{CreateApiKeyRequest, CreateApiKeyResponse, LoginRequest, RegisterRequest};
use crate::models::{normalize_email, Account, ApiKeyInfo, SessionInfo, User, LOCAL_PROVIDER};
use crate::store::{CredentialStore, StoreError, UserDirectory};
use crate::utils::{
    dummy_password_hash, hash_password, verify_password, Password, PasswordHashString,
};

/// A credential presented by a caller, already pulled out of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Signed access token.
    Bearer(String),
    ApiKey(String),
    /// Opaque session token, typically from the session cookie.
    SessionToken(String),
}

/// Session and token failures on a presented bearer secret all read as an
/// invalid token to the caller.
fn as_invalid_token(err: AuthError) -> AuthError {
    match err {
        AuthError::SessionNotFound | AuthError::SessionExpired | AuthError::UserNotFound => {
            AuthError::InvalidToken
        }
        other => other,
    }
}

fn user_lookup_error(op: &'static str) -> impl FnOnce(StoreError) -> AuthError {
    move |e| match e {
        StoreError::NotFound => AuthError::UserNotFound,
        other => AuthError::Storage { op, source: other },
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn CredentialStore>,
    issuer: CredentialIssuer,
    api_keys: ApiKeyManager,
    lockout: Arc<dyn LockoutPolicy>,
    mail: Arc<dyn MailSender>,
    verification: VerificationTokens,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn CredentialStore>,
        issuer: CredentialIssuer,
        api_keys: ApiKeyManager,
        lockout: Arc<dyn LockoutPolicy>,
        mail: Arc<dyn MailSender>,
        verification: VerificationTokens,
    ) -> Self {
        Self {
            users,
            store,
            issuer,
            api_keys,
            lockout,
            mail,
            verification,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        self.issuer.sessions()
    }

    pub fn api_keys(&self) -> &ApiKeyManager {
        &self.api_keys
    }

    pub async fn register(
        &self,
        req: RegisterRequest,
        client: ClientInfo,
    ) -> Result<AuthResult, AuthError> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        let email = normalize_email(&req.email);

        match self.users.get_user_by_email(&email).await {
            Ok(_) => return Err(AuthError::UserExists),
            Err(StoreError::NotFound) => {}
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get user by email",
                    source: e,
                })
            }
        }

        PasswordPolicy::validate(&req.password).map_err(|violations| {
            AuthError::WeakPassword(violations.iter().map(ToString::to_string).collect())
        })?;

        let password = Password::new(req.password);
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))??;

        let name = req.name.filter(|n| !n.trim().is_empty());
        let user = User::new(email.clone(), name, false);
        self.users.create_user(&user).await.map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::UserExists,
            other => AuthError::Storage {
                op: "create user",
                source: other,
            },
        })?;

        let guard = UserCompensation::new(self.users.clone(), user.id);
        let account = Account::new_local(user.id, &email, password_hash.into_string());
        if let Err(e) = self.store.create_account(&account).await {
            guard.compensate().await;
            return Err(AuthError::Storage {
                op: "create account",
                source: e,
            });
        }
        guard.disarm();

        tracing::info!(user_id = %user.id, "User registered");

        // Registration stands without a token; the user can request another.
        match self.verification.issue(&user).await {
            Ok(token) => self.spawn_verification_email(&user, token),
            Err(e) => tracing::error!(
                user_id = %user.id,
                error = %e,
                "Failed to issue verification token"
            ),
        }

        self.issuer
            .issue(
                user,
                None,
                AuthMethod::Password,
                None,
                RefreshLifetime::Standard,
                client,
            )
            .await
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        client: ClientInfo,
    ) -> Result<AuthResult, AuthError> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        let email = normalize_email(&req.email);
        let attempt = LoginAttempt {
            email: &email,
            ip_address: client.ip_address.as_deref(),
        };

        self.lockout.check(attempt).await?;

        let user = match self.verify_credentials(&email, req.password).await {
            Ok(user) => user,
            Err(AuthError::InvalidCredentials) => {
                self.lockout.record_failure(attempt).await;
                tracing::warn!(ip = ?attempt.ip_address, "Login failed: invalid credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        };
        self.lockout.record_success(attempt).await;

        let lifetime = if req.remember_me {
            RefreshLifetime::Extended
        } else {
            RefreshLifetime::Standard
        };

        let result = self
            .issuer
            .issue(
                user,
                req.organization_id,
                AuthMethod::Password,
                None,
                lifetime,
                client,
            )
            .await?;

        tracing::info!(
            user_id = %result.user.id,
            session_id = %result.session.id,
            remember_me = req.remember_me,
            "User logged in"
        );
        Ok(result)
    }

    /// Every miss collapses into `InvalidCredentials`. An address without a
    /// local login still pays for one Argon2 verification.
    async fn verify_credentials(&self, email: &str, password: String) -> Result<User, AuthError> {
        let local = self.local_login(email).await?;
        let hash = local.as_ref().map(|(_, hash)| hash.clone());

        let password = Password::new(password);
        let matches = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => verify_password(&password, &hash),
            None => match dummy_password_hash() {
                Some(dummy) => verify_password(&password, dummy).map(|_| false),
                None => Ok(false),
            },
        })
        .await
        .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))??;

        match local {
            Some((user, _)) if matches => Ok(user),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// The user behind `email` and their local password hash, if both exist.
    async fn local_login(
        &self,
        email: &str,
    ) -> Result<Option<(User, PasswordHashString)>, AuthError> {
        let user = match self.users.get_user_by_email(email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get user by email",
                    source: e,
                })
            }
        };

        let account = match self.store.get_account_by_provider(LOCAL_PROVIDER, email).await {
            Ok(account) if account.user_id == user.id => account,
            Ok(_) | Err(StoreError::NotFound) => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get local account",
                    source: e,
                })
            }
        };

        Ok(account
            .password_hash
            .map(|hash| (user, PasswordHashString::new(hash))))
    }

    fn spawn_verification_email(&self, user: &User, token: String) {
        let mail = self.mail.clone();
        let to = user.email.clone();
        let name = user.name.clone();
        tokio::spawn(async move {
            if let Err(e) = mail
                .send_verification_email(&to, name.as_deref(), &token)
                .await
            {
                tracing::error!(error = %e, "Failed to send verification email");
            }
        });
    }

    /// Redeem a verification token: mark the address verified and send the
    /// welcome mail.
    pub async fn verify_email(&self, token: &str) -> Result<User, AuthError> {
        let pending = self.verification.consume(token).await?;
        let user = self
            .users
            .mark_email_verified(pending.user_id)
            .await
            .map_err(user_lookup_error("mark email verified"))?;

        let mail = self.mail.clone();
        let to = user.email.clone();
        let name = user.name.clone();
        tokio::spawn(async move {
            if let Err(e) = mail.send_welcome_email(&to, name.as_deref()).await {
                tracing::error!(error = %e, "Failed to send welcome email");
            }
        });

        tracing::info!(user_id = %user.id, "Email verified");
        Ok(user)
    }

    /// Mail a fresh verification token. Unknown and already verified
    /// addresses succeed silently so callers cannot enumerate accounts.
    pub async fn resend_verification_email(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let user = match self.users.get_user_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                tracing::debug!("Verification resend for unknown address");
                return Ok(());
            }
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get user by email",
                    source: e,
                })
            }
        };
        if user.email_verified {
            return Ok(());
        }

        let token = self.verification.issue(&user).await?;
        self.mail
            .send_verification_email(&user.email, user.name.as_deref(), &token)
            .await
            .map_err(AuthError::Internal)?;

        tracing::info!(user_id = %user.id, "Verification email resent");
        Ok(())
    }

    /// Delete the session behind `session_token`. A second logout with the
    /// same token fails with `InvalidToken`.
    pub async fn logout(&self, session_token: &str) -> Result<(), AuthError> {
        let session = self
            .sessions()
            .delete_by_token(session_token)
            .await
            .map_err(as_invalid_token)?;
        tracing::info!(user_id = %session.user_id, session_id = %session.id, "User logged out");
        Ok(())
    }

    /// Exchange a refresh token for a new pair. The bound session must still
    /// be live; its expiry slides forward.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let envelope = self.issuer.jwt().validate::<RefreshClaims>(refresh_token)?;
        let claims = envelope.claims;

        let session = self
            .sessions()
            .get(claims.sid)
            .await
            .map_err(as_invalid_token)?;
        if session.user_id != claims.uid {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .users
            .get_user(claims.uid)
            .await
            .map_err(user_lookup_error("get user"))
            .map_err(as_invalid_token)?;

        let session = self
            .sessions()
            .refresh(session.id)
            .await
            .map_err(as_invalid_token)?;

        let access = self
            .issuer
            .access_claims(&user, &session, claims.auth_method, claims.provider.as_deref())
            .await?;
        let lifetime = if claims.extended {
            RefreshLifetime::Extended
        } else {
            RefreshLifetime::Standard
        };

        tracing::debug!(user_id = %user.id, session_id = %session.id, "Tokens refreshed");
        self.issuer
            .jwt()
            .issue_token_pair(access, session.id, lifetime)
    }

    /// Verify an access token. A token bound to a session dies with it.
    pub async fn validate_token(&self, access_token: &str) -> Result<AuthContext, AuthError> {
        let envelope = self.issuer.jwt().validate::<AccessClaims>(access_token)?;

        if let Some(sid) = envelope.claims.sid {
            let session = self.sessions().get(sid).await.map_err(as_invalid_token)?;
            if session.user_id != envelope.claims.uid {
                return Err(AuthError::InvalidToken);
            }
        }

        Ok(AuthContext::from_access_token(&envelope))
    }

    pub async fn authenticate(&self, credential: &Credential) -> Result<AuthContext, AuthError> {
        match credential {
            Credential::Bearer(token) => self.validate_token(token).await,
            Credential::ApiKey(key) => {
                let record = self.api_keys.validate(key).await?;
                Ok(AuthContext::from_api_key(&record))
            }
            Credential::SessionToken(token) => {
                let session = self
                    .sessions()
                    .validate(token)
                    .await
                    .map_err(as_invalid_token)?;
                let user = self
                    .users
                    .get_user(session.user_id)
                    .await
                    .map_err(user_lookup_error("get user"))
                    .map_err(as_invalid_token)?;
                let roles = self
                    .issuer
                    .roles_for(&user, session.active_organization_id)
                    .await?;
                Ok(AuthContext::from_session(&session, &user, roles))
            }
        }
    }

    /// Trade a valid API key for a signed token that expires no later than
    /// the key itself.
    pub async fn issue_api_key_token(&self, key: &str) -> Result<IssuedToken, AuthError> {
        let record = self.api_keys.validate(key).await?;
        let remaining = record.expires_at - Utc::now();
        let ttl = remaining.min(self.issuer.jwt().access_ttl());

        let claims = ApiKeyClaims {
            kid: record.id,
            uid: record.user_id,
            org_id: record.organization_id,
            name: record.name.clone(),
            scopes: record.scopes.clone(),
            rate_limit: record.rate_limit,
        };
        self.issuer.jwt().issue(record.user_id, claims, ttl)
    }

    pub async fn create_api_key(
        &self,
        user_id: Uuid,
        req: CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse, AuthError> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        if let Some(unknown) = req
            .scopes
            .iter()
            .find(|s| !API_KEY_SCOPES.contains(&s.as_str()))
        {
            return Err(AuthError::InvalidRequest(format!("Unknown scope: {}", unknown)));
        }
        self.issuer
            .authorize_organization(user_id, req.organization_id)
            .await?;

        let created = self
            .api_keys
            .create(NewApiKey {
                user_id,
                organization_id: req.organization_id,
                name: req.name,
                scopes: req.scopes,
                environment: req.environment.into(),
                rate_limit: req.rate_limit,
                ttl: req.expires_in_days.map(chrono::Duration::days),
            })
            .await?;

        Ok(CreateApiKeyResponse {
            key: created.key,
            info: created.record.into(),
        })
    }

    /// Move the caller's session into `organization_id` (or out of every
    /// organization) and return tokens carrying the new context.
    pub async fn switch_organization(
        &self,
        ctx: &AuthContext,
        organization_id: Option<Uuid>,
    ) -> Result<AuthResult, AuthError> {
        let session_id = ctx.session_id.ok_or(AuthError::SessionNotFound)?;
        let user = self
            .users
            .get_user(ctx.user_id)
            .await
            .map_err(user_lookup_error("get user"))?;

        let (session, tokens) = self
            .issuer
            .switch_organization(
                &user,
                session_id,
                organization_id,
                ctx.method,
                RefreshLifetime::Standard,
            )
            .await?;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            organization_id = ?organization_id,
            "Active organization switched"
        );
        Ok(AuthResult {
            user,
            session,
            tokens,
        })
    }

    pub async fn revoke_api_key(&self, user_id: Uuid, key_id: Uuid) -> Result<(), AuthError> {
        self.api_keys.revoke(user_id, key_id).await
    }

    pub async fn list_api_keys(&self, user_id: Uuid) -> Result<Vec<ApiKeyInfo>, AuthError> {
        self.api_keys.list_user_keys(user_id).await
    }

    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_session: Option<Uuid>,
    ) -> Result<Vec<SessionInfo>, AuthError> {
        Ok(self
            .sessions()
            .list_user_sessions(user_id)
            .await?
            .into_iter()
            .map(|s| {
                let is_current = Some(s.id) == current_session;
                SessionInfo {
                    is_current,
                    ..SessionInfo::from(s)
                }
            })
            .collect())
    }

    /// Revoke one of the caller's own sessions. Someone else's session looks
    /// the same as a missing one.
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let session = match self.sessions().get(session_id).await {
            Ok(session) => session,
            Err(AuthError::SessionExpired) => return Ok(()),
            Err(e) => return Err(e),
        };
        if session.user_id != user_id {
            return Err(AuthError::SessionNotFound);
        }
        self.sessions().delete(session_id).await
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, AuthError> {
        self.sessions().delete_user_sessions(user_id).await
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<u64, AuthError> {
        self.sessions().delete_expired_sessions().await
    }
}
