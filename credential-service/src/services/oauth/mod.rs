//! Provider redirect, code exchange, account linking, then the same session
//! and token issuance as password login.

pub mod providers;
pub mod state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use self::providers::{GitHubProvider, GoogleProvider, MicrosoftProvider, OAuthProvider};
pub use self::state::{pkce_challenge, OAuthStateStore};

use super::compensation::UserCompensation;
use super::error::{AuthError, ProviderError};
use super::issuance::{AuthResult, ClientInfo, CredentialIssuer};
use super::jwt::{AuthMethod, RefreshLifetime};
use crate::config::OAuthConfig;
use crate::models::{normalize_email, Account, ProviderTokens, ProviderUserInfo, User};
use crate::store::{CredentialStore, StoreError, UserDirectory};
use crate::utils::token::constant_time_eq;

/// Providers with credentials present in `config`.
pub fn providers_from_config(
    config: &OAuthConfig,
) -> Result<Vec<Arc<dyn OAuthProvider>>, ProviderError> {
    let timeout = Duration::from_secs(config.provider_timeout_seconds);
    let mut providers: Vec<Arc<dyn OAuthProvider>> = Vec::new();
    if let Some(creds) = &config.google {
        providers.push(Arc::new(GoogleProvider::new(creds, timeout)?));
    }
    if let Some(creds) = &config.github {
        providers.push(Arc::new(GitHubProvider::new(creds, timeout)?));
    }
    if let Some(creds) = &config.microsoft {
        providers.push(Arc::new(MicrosoftProvider::new(creds, timeout)?));
    }
    Ok(providers)
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// What the redirect callback received. `stored_state` is the value the
/// browser was bound to when the flow started (e.g. from a cookie).
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub provider: String,
    pub code: String,
    pub state: String,
    pub stored_state: String,
}

#[derive(Clone)]
pub struct OAuthOrchestrator {
    providers: Arc<HashMap<String, Arc<dyn OAuthProvider>>>,
    states: OAuthStateStore,
    store: Arc<dyn CredentialStore>,
    users: Arc<dyn UserDirectory>,
    issuer: CredentialIssuer,
    timeout: Duration,
}

impl OAuthOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn OAuthProvider>>,
        states: OAuthStateStore,
        store: Arc<dyn CredentialStore>,
        users: Arc<dyn UserDirectory>,
        issuer: CredentialIssuer,
        timeout: Duration,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        Self {
            providers: Arc::new(providers),
            states,
            store,
            users,
            issuer,
            timeout,
        }
    }

    fn provider(&self, id: &str) -> Result<Arc<dyn OAuthProvider>, AuthError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(id.to_string()))
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => Err(ProviderError::Timeout.into()),
        }
    }

    pub async fn get_auth_url(
        &self,
        provider_id: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        let provider = self.provider(provider_id)?;
        let pending = self.states.issue(provider_id, redirect_uri).await?;
        let url = provider.authorization_url(
            &pending.state,
            redirect_uri,
            &pkce_challenge(&pending.code_verifier),
        );

        tracing::debug!(provider = %provider_id, "OAuth authorization started");
        Ok(AuthorizationRequest {
            url,
            state: pending.state,
        })
    }

    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        client: ClientInfo,
    ) -> Result<AuthResult, AuthError> {
        if params.state.is_empty() || !constant_time_eq(&params.state, &params.stored_state) {
            tracing::warn!(provider = %params.provider, "OAuth state mismatch");
            self.states.discard(&params.stored_state).await;
            return Err(AuthError::InvalidOAuthState);
        }

        let provider = match self.provider(&params.provider) {
            Ok(provider) => provider,
            Err(e) => {
                self.states.discard(&params.state).await;
                return Err(e);
            }
        };

        // Consuming removes the entry whatever happens next.
        let pending = self.states.consume(&params.state).await?;
        if pending.provider != params.provider {
            tracing::warn!(
                expected = %pending.provider,
                actual = %params.provider,
                "OAuth callback for a different provider"
            );
            return Err(AuthError::InvalidOAuthState);
        }

        let tokens = self
            .call(provider.exchange_code(
                &params.code,
                &pending.redirect_uri,
                &pending.code_verifier,
            ))
            .await?;
        let info = self.call(provider.user_info(&tokens.access_token)).await?;

        let user = self.link_or_create(&params.provider, &info, &tokens).await?;

        self.issuer
            .issue(
                user,
                None,
                AuthMethod::OAuth,
                Some(&params.provider),
                RefreshLifetime::Standard,
                client,
            )
            .await
    }

    /// Existing provider account first, then an email match, then a new user.
    async fn link_or_create(
        &self,
        provider_id: &str,
        info: &ProviderUserInfo,
        tokens: &ProviderTokens,
    ) -> Result<User, AuthError> {
        match self
            .store
            .get_account_by_provider(provider_id, &info.provider_account_id)
            .await
        {
            Ok(mut account) => {
                account.apply_tokens(tokens);
                self.store
                    .update_account(&account)
                    .await
                    .map_err(AuthError::storage("update account"))?;
                return self.users.get_user(account.user_id).await.map_err(|e| match e {
                    StoreError::NotFound => AuthError::UserNotFound,
                    other => AuthError::Storage {
                        op: "get user",
                        source: other,
                    },
                });
            }
            Err(StoreError::NotFound) => {}
            Err(e) => {
                return Err(AuthError::Storage {
                    op: "get account by provider",
                    source: e,
                })
            }
        }

        let email = info
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or(ProviderError::MissingField("email"))?;

        match self.users.get_user_by_email(&email).await {
            Ok(user) => {
                // Merging identities on an unverified address would hand the
                // local account to whoever controls the provider profile.
                if !info.email_verified {
                    tracing::warn!(provider = %provider_id, "Refusing to link on unverified email");
                    return Err(AuthError::UserExists);
                }
                let account =
                    Account::new_oauth(user.id, provider_id, &info.provider_account_id, tokens);
                self.store
                    .create_account(&account)
                    .await
                    .map_err(AuthError::storage("create account"))?;
                tracing::info!(
                    user_id = %user.id,
                    provider = %provider_id,
                    "Linked provider account"
                );
                Ok(user)
            }
            Err(StoreError::NotFound) => self.create_user(provider_id, email, info, tokens).await,
            Err(e) => Err(AuthError::Storage {
                op: "get user by email",
                source: e,
            }),
        }
    }

    async fn create_user(
        &self,
        provider_id: &str,
        email: String,
        info: &ProviderUserInfo,
        tokens: &ProviderTokens,
    ) -> Result<User, AuthError> {
        let user = User::new(email, info.name.clone(), info.email_verified);
        self.users.create_user(&user).await.map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::UserExists,
            other => AuthError::Storage {
                op: "create user",
                source: other,
            },
        })?;

        let guard = UserCompensation::new(self.users.clone(), user.id);
        let account = Account::new_oauth(user.id, provider_id, &info.provider_account_id, tokens);
        if let Err(e) = self.store.create_account(&account).await {
            guard.compensate().await;
            return Err(AuthError::Storage {
                op: "create account",
                source: e,
            });
        }
        guard.disarm();

        tracing::info!(
            user_id = %user.id,
            provider = %provider_id,
            "Created user from provider account"
        );
        Ok(user)
    }

    /// Rotate the stored provider tokens for `user_id`'s linked account.
    pub async fn refresh_provider_token(
        &self,
        user_id: Uuid,
        provider_id: &str,
    ) -> Result<Account, AuthError> {
        let provider = self.provider(provider_id)?;
        let mut account = self.linked_account(user_id, provider_id).await?;
        let refresh_token = account
            .refresh_token
            .clone()
            .ok_or(ProviderError::MissingField("refresh_token"))?;

        let tokens = self.call(provider.refresh_token(&refresh_token)).await?;
        account.apply_tokens(&tokens);
        self.store
            .update_account(&account)
            .await
            .map_err(AuthError::storage("update account"))?;

        tracing::info!(user_id = %user_id, provider = %provider_id, "Provider token refreshed");
        Ok(account)
    }

    /// Remove a linked provider. The last remaining account cannot go.
    pub async fn unlink_account(&self, user_id: Uuid, provider_id: &str) -> Result<(), AuthError> {
        let accounts = self
            .store
            .list_user_accounts(user_id)
            .await
            .map_err(AuthError::storage("list accounts"))?;

        let account = accounts
            .iter()
            .find(|a| a.provider_id == provider_id)
            .ok_or(AuthError::AccountNotFound)?;
        if accounts.len() <= 1 {
            return Err(AuthError::LastAuthMethod);
        }

        self.store.delete_account(account.id).await.map_err(|e| match e {
            StoreError::NotFound => AuthError::AccountNotFound,
            other => AuthError::Storage {
                op: "delete account",
                source: other,
            },
        })?;

        tracing::info!(user_id = %user_id, provider = %provider_id, "Provider account unlinked");
        Ok(())
    }

    async fn linked_account(&self, user_id: Uuid, provider_id: &str) -> Result<Account, AuthError> {
        self.store
            .list_user_accounts(user_id)
            .await
            .map_err(AuthError::storage("list accounts"))?
            .into_iter()
            .find(|a| a.provider_id == provider_id)
            .ok_or(AuthError::AccountNotFound)
    }
}
