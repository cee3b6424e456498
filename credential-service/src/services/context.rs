use serde::Serialize;
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::{AccessClaims, AuthMethod, Envelope};
use super::permissions;
use crate::models::{ApiKey, Session, User};

/// Resolved identity of an authenticated request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub organization_id: Option<Uuid>,
    pub method: AuthMethod,
    pub session_id: Option<Uuid>,
    pub api_key_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub scopes: Vec<String>,
    pub email_verified: bool,
}

impl AuthContext {
    pub fn from_access_token(envelope: &Envelope<AccessClaims>) -> Self {
        let claims = &envelope.claims;
        Self {
            user_id: claims.uid,
            email: Some(claims.email.clone()),
            organization_id: claims.org_id,
            method: claims.auth_method,
            session_id: claims.sid,
            api_key_id: None,
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            scopes: claims.scopes.clone(),
            email_verified: claims.email_verified,
        }
    }

    /// API keys act with exactly their granted scopes and no roles.
    pub fn from_api_key(key: &ApiKey) -> Self {
        Self {
            user_id: key.user_id,
            email: None,
            organization_id: key.organization_id,
            method: AuthMethod::ApiKey,
            session_id: None,
            api_key_id: Some(key.id),
            roles: Vec::new(),
            permissions: Vec::new(),
            scopes: key.scopes.clone(),
            email_verified: false,
        }
    }

    pub fn from_session(session: &Session, user: &User, roles: Vec<String>) -> Self {
        Self {
            user_id: user.id,
            email: Some(user.email.clone()),
            organization_id: session.active_organization_id,
            method: AuthMethod::Password,
            session_id: Some(session.id),
            api_key_id: None,
            permissions: permissions::permissions_for_roles(&roles),
            roles,
            scopes: permissions::default_scopes(),
            email_verified: user.email_verified,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Every scope in `required` must be granted.
    pub fn require_scopes(&self, required: &[&str]) -> Result<(), AuthError> {
        let missing = required
            .iter()
            .any(|scope| !self.scopes.iter().any(|s| s == scope));
        if missing {
            tracing::debug!(user_id = %self.user_id, ?required, "Missing required scopes");
            return Err(AuthError::InsufficientScopes);
        }
        Ok(())
    }

    pub fn require_organization(&self, organization_id: Uuid) -> Result<(), AuthError> {
        if self.organization_id != Some(organization_id) {
            return Err(AuthError::UnauthorizedOrganization);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn key_with_scopes(scopes: &[&str]) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            organization_id: Some(Uuid::new_v4()),
            name: "ci".to_string(),
            key_hash: "h".to_string(),
            prefix: "sk_live_".to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            rate_limit: 100,
            expires_at: Utc::now() + Duration::days(1),
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_require_scopes() {
        let ctx = AuthContext::from_api_key(&key_with_scopes(&["read:workflows"]));
        assert!(ctx.require_scopes(&["read:workflows"]).is_ok());
        assert!(matches!(
            ctx.require_scopes(&["read:workflows", "write:workflows"]),
            Err(AuthError::InsufficientScopes)
        ));
    }

    #[test]
    fn test_require_organization() {
        let key = key_with_scopes(&[]);
        let ctx = AuthContext::from_api_key(&key);
        let org = key.organization_id.unwrap();
        assert!(ctx.require_organization(org).is_ok());
        assert!(matches!(
            ctx.require_organization(Uuid::new_v4()),
            Err(AuthError::UnauthorizedOrganization)
        ));
    }
}
