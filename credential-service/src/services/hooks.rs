//! Pluggable policy seams consulted by the facade.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::permissions::roles;
use crate::models::User;

/// A password attempt as seen by the lockout policy.
#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    pub email: &'a str,
    pub ip_address: Option<&'a str>,
}

/// Account lockout policy consulted around password checks. Implementations
/// may key on the email, the client address or both.
#[async_trait]
pub trait LockoutPolicy: Send + Sync {
    /// Err when the identity is currently locked out.
    async fn check(&self, attempt: LoginAttempt<'_>) -> Result<(), AuthError>;
    async fn record_failure(&self, attempt: LoginAttempt<'_>);
    async fn record_success(&self, attempt: LoginAttempt<'_>);
}

/// Never locks anyone out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLockout;

#[async_trait]
impl LockoutPolicy for NoLockout {
    async fn check(&self, _attempt: LoginAttempt<'_>) -> Result<(), AuthError> {
        Ok(())
    }

    async fn record_failure(&self, _attempt: LoginAttempt<'_>) {}

    async fn record_success(&self, _attempt: LoginAttempt<'_>) {}
}

/// Organization membership and the roles placed in access tokens.
#[async_trait]
pub trait RoleResolver: Send + Sync {
    async fn is_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool, AuthError>;

    async fn roles_for(
        &self,
        user: &User,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<String>, AuthError>;
}

/// In-process membership table. Members get `org_member` inside their
/// organizations; nobody belongs anywhere until added.
#[derive(Debug, Default, Clone)]
pub struct MembershipRoles {
    members: Arc<DashMap<Uuid, HashSet<Uuid>>>,
}

impl MembershipRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, user_id: Uuid, organization_id: Uuid) {
        self.members.entry(user_id).or_default().insert(organization_id);
    }

    pub fn remove_member(&self, user_id: Uuid, organization_id: Uuid) {
        if let Some(mut orgs) = self.members.get_mut(&user_id) {
            orgs.remove(&organization_id);
        }
    }

    fn contains(&self, user_id: Uuid, organization_id: Uuid) -> bool {
        self.members
            .get(&user_id)
            .is_some_and(|orgs| orgs.contains(&organization_id))
    }
}

#[async_trait]
impl RoleResolver for MembershipRoles {
    async fn is_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool, AuthError> {
        Ok(self.contains(user_id, organization_id))
    }

    async fn roles_for(
        &self,
        user: &User,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<String>, AuthError> {
        Ok(match organization_id {
            Some(org) if self.contains(user.id, org) => vec![roles::ORG_MEMBER.to_string()],
            _ => Vec::new(),
        })
    }
}

/// Err unless `user_id` belongs to `organization_id`. No organization is
/// always allowed.
pub async fn authorize_organization(
    resolver: &dyn RoleResolver,
    user_id: Uuid,
    organization_id: Option<Uuid>,
) -> Result<(), AuthError> {
    let Some(org) = organization_id else {
        return Ok(());
    };
    if resolver.is_member(user_id, org).await? {
        Ok(())
    } else {
        tracing::warn!(user_id = %user_id, organization_id = %org, "Organization access denied");
        Err(AuthError::UnauthorizedOrganization)
    }
}
