//! The one path that turns an authenticated user into a session plus a token
//! pair. Password login, registration and OAuth all end here.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::hooks::{authorize_organization, RoleResolver};
use super::jwt::{AccessClaims, AuthMethod, JwtService, RefreshLifetime, TokenPair};
use super::permissions::{default_scopes, permissions_for_roles};
use super::session::SessionManager;
use crate::models::{Session, User};

/// Audit details of the client that authenticated.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub user: User,
    pub session: Session,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct CredentialIssuer {
    sessions: SessionManager,
    jwt: JwtService,
    roles: Arc<dyn RoleResolver>,
}

impl CredentialIssuer {
    pub fn new(sessions: SessionManager, jwt: JwtService, roles: Arc<dyn RoleResolver>) -> Self {
        Self {
            sessions,
            jwt,
            roles,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub async fn roles_for(
        &self,
        user: &User,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<String>, AuthError> {
        self.roles.roles_for(user, organization_id).await
    }

    /// `UnauthorizedOrganization` unless the user belongs to the organization.
    pub async fn authorize_organization(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<(), AuthError> {
        authorize_organization(self.roles.as_ref(), user_id, organization_id).await
    }

    /// Move the session into another organization (or out of all of them)
    /// and sign a token pair carrying the new context.
    pub async fn switch_organization(
        &self,
        user: &User,
        session_id: Uuid,
        organization_id: Option<Uuid>,
        method: AuthMethod,
        lifetime: RefreshLifetime,
    ) -> Result<(Session, TokenPair), AuthError> {
        let session = self.sessions.get(session_id).await?;
        if session.user_id != user.id {
            return Err(AuthError::SessionNotFound);
        }
        self.authorize_organization(user.id, organization_id).await?;

        let session = self
            .sessions
            .set_active_organization(session_id, organization_id)
            .await?;
        let tokens = self.sign(user, &session, method, None, lifetime).await?;
        Ok((session, tokens))
    }

    pub async fn access_claims(
        &self,
        user: &User,
        session: &Session,
        method: AuthMethod,
        provider: Option<&str>,
    ) -> Result<AccessClaims, AuthError> {
        let roles = self.roles_for(user, session.active_organization_id).await?;
        let org_role = session
            .active_organization_id
            .and_then(|_| roles.first().cloned());

        Ok(AccessClaims {
            uid: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            org_id: session.active_organization_id,
            org_role,
            permissions: permissions_for_roles(&roles),
            roles,
            scopes: default_scopes(),
            auth_method: method,
            sid: Some(session.id),
            provider: provider.map(str::to_string),
            email_verified: user.email_verified,
        })
    }

    /// Check organization membership, enforce the session cap, open a
    /// session and sign tokens bound to it.
    pub async fn issue(
        &self,
        user: User,
        organization_id: Option<Uuid>,
        method: AuthMethod,
        provider: Option<&str>,
        lifetime: RefreshLifetime,
        client: ClientInfo,
    ) -> Result<AuthResult, AuthError> {
        self.authorize_organization(user.id, organization_id).await?;
        self.sessions.enforce_session_cap(user.id).await?;

        let session = self
            .sessions
            .create(user.id, organization_id, client.ip_address, client.user_agent)
            .await?;

        let tokens = match self.sign(&user, &session, method, provider, lifetime).await {
            Ok(tokens) => tokens,
            Err(e) => {
                if let Err(cleanup) = self.sessions.delete(session.id).await {
                    tracing::error!(
                        session_id = %session.id,
                        error = %cleanup,
                        "Failed to delete session after token issuance failure"
                    );
                }
                return Err(e);
            }
        };

        Ok(AuthResult {
            user,
            session,
            tokens,
        })
    }

    async fn sign(
        &self,
        user: &User,
        session: &Session,
        method: AuthMethod,
        provider: Option<&str>,
        lifetime: RefreshLifetime,
    ) -> Result<TokenPair, AuthError> {
        let claims = self.access_claims(user, session, method, provider).await?;
        self.jwt.issue_token_pair(claims, session.id, lifetime)
    }
}
