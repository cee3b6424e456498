//! Static role → permission table and scope vocabulary.

pub mod roles {
    pub const SUPER_ADMIN: &str = "super_admin";
    pub const SYSTEM_ADMIN: &str = "system_admin";
    pub const SUPPORT: &str = "support";
    pub const ORG_OWNER: &str = "org_owner";
    pub const ORG_ADMIN: &str = "org_admin";
    pub const ORG_MEMBER: &str = "org_member";
    pub const ORG_VIEWER: &str = "org_viewer";
    pub const ORG_GUEST: &str = "org_guest";
    pub const API_USER: &str = "api_user";
    pub const SERVICE_ACCOUNT: &str = "service_account";
}

pub mod perms {
    pub const SYSTEM_MANAGE: &str = "system:manage";
    pub const SYSTEM_VIEW_METRICS: &str = "system:view_metrics";
    pub const SYSTEM_VIEW_LOGS: &str = "system:view_logs";
    pub const SYSTEM_MANAGE_USERS: &str = "system:manage_users";

    pub const ORG_CREATE: &str = "org:create";
    pub const ORG_READ: &str = "org:read";
    pub const ORG_UPDATE: &str = "org:update";
    pub const ORG_DELETE: &str = "org:delete";
    pub const ORG_MANAGE_MEMBERS: &str = "org:manage_members";
    pub const ORG_MANAGE_BILLING: &str = "org:manage_billing";
    pub const ORG_MANAGE_SETTINGS: &str = "org:manage_settings";
    pub const ORG_INVITE_MEMBERS: &str = "org:invite_members";
    pub const ORG_VIEW_AUDIT_LOG: &str = "org:view_audit_log";

    pub const WORKFLOW_CREATE: &str = "workflow:create";
    pub const WORKFLOW_READ: &str = "workflow:read";
    pub const WORKFLOW_UPDATE: &str = "workflow:update";
    pub const WORKFLOW_DELETE: &str = "workflow:delete";
    pub const WORKFLOW_EXECUTE: &str = "workflow:execute";

    pub const CONTENT_CREATE: &str = "content:create";
    pub const CONTENT_READ: &str = "content:read";
    pub const CONTENT_UPDATE: &str = "content:update";
    pub const CONTENT_DELETE: &str = "content:delete";
    pub const CONTENT_SHARE: &str = "content:share";
    pub const CONTENT_PUBLISH: &str = "content:publish";

    pub const AI_USE_BASIC: &str = "ai:use_basic";
    pub const AI_USE_PREMIUM: &str = "ai:use_premium";
    pub const AI_MANAGE_KEYS: &str = "ai:manage_keys";

    pub const API_CREATE_KEYS: &str = "api:create_keys";
    pub const API_MANAGE_KEYS: &str = "api:manage_keys";
}

pub mod scopes {
    pub const OPENID: &str = "openid";
    pub const EMAIL: &str = "email";
    pub const PROFILE: &str = "profile";
    pub const READ_PROFILE: &str = "read:profile";
    pub const READ_ORGANIZATIONS: &str = "read:organizations";
    pub const READ_WORKFLOWS: &str = "read:workflows";
    pub const WRITE_WORKFLOWS: &str = "write:workflows";
    pub const EXECUTE_WORKFLOWS: &str = "execute:workflows";
    pub const READ_CONTENT: &str = "read:content";
    pub const WRITE_CONTENT: &str = "write:content";
    pub const EXECUTE_AI: &str = "execute:ai";
}

use perms::*;

const SUPER_ADMIN_PERMISSIONS: &[&str] = &[
    SYSTEM_MANAGE,
    SYSTEM_VIEW_METRICS,
    SYSTEM_VIEW_LOGS,
    SYSTEM_MANAGE_USERS,
    ORG_CREATE,
    ORG_READ,
    ORG_UPDATE,
    ORG_DELETE,
    ORG_MANAGE_MEMBERS,
    ORG_MANAGE_BILLING,
    ORG_MANAGE_SETTINGS,
    ORG_INVITE_MEMBERS,
    ORG_VIEW_AUDIT_LOG,
    WORKFLOW_CREATE,
    WORKFLOW_READ,
    WORKFLOW_UPDATE,
    WORKFLOW_DELETE,
    WORKFLOW_EXECUTE,
    CONTENT_CREATE,
    CONTENT_READ,
    CONTENT_UPDATE,
    CONTENT_DELETE,
    CONTENT_SHARE,
    CONTENT_PUBLISH,
    AI_USE_PREMIUM,
    AI_MANAGE_KEYS,
    API_CREATE_KEYS,
    API_MANAGE_KEYS,
];

const ORG_OWNER_PERMISSIONS: &[&str] = &[
    ORG_READ,
    ORG_UPDATE,
    ORG_DELETE,
    ORG_MANAGE_MEMBERS,
    ORG_MANAGE_BILLING,
    ORG_MANAGE_SETTINGS,
    ORG_INVITE_MEMBERS,
    ORG_VIEW_AUDIT_LOG,
    WORKFLOW_CREATE,
    WORKFLOW_READ,
    WORKFLOW_UPDATE,
    WORKFLOW_DELETE,
    WORKFLOW_EXECUTE,
    CONTENT_CREATE,
    CONTENT_READ,
    CONTENT_UPDATE,
    CONTENT_DELETE,
    CONTENT_SHARE,
    CONTENT_PUBLISH,
    AI_USE_PREMIUM,
    API_CREATE_KEYS,
];

const ORG_ADMIN_PERMISSIONS: &[&str] = &[
    ORG_READ,
    ORG_UPDATE,
    ORG_MANAGE_MEMBERS,
    ORG_INVITE_MEMBERS,
    WORKFLOW_CREATE,
    WORKFLOW_READ,
    WORKFLOW_UPDATE,
    WORKFLOW_EXECUTE,
    CONTENT_CREATE,
    CONTENT_READ,
    CONTENT_UPDATE,
    CONTENT_SHARE,
    AI_USE_BASIC,
];

const ORG_MEMBER_PERMISSIONS: &[&str] = &[
    ORG_READ,
    WORKFLOW_CREATE,
    WORKFLOW_READ,
    WORKFLOW_EXECUTE,
    CONTENT_CREATE,
    CONTENT_READ,
    CONTENT_UPDATE,
    AI_USE_BASIC,
];

const ORG_VIEWER_PERMISSIONS: &[&str] = &[ORG_READ, WORKFLOW_READ, CONTENT_READ];

const ORG_GUEST_PERMISSIONS: &[&str] = &[ORG_READ, CONTENT_READ];

/// Permissions granted to `role`; unknown roles grant nothing.
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match role {
        roles::SUPER_ADMIN => SUPER_ADMIN_PERMISSIONS,
        roles::ORG_OWNER => ORG_OWNER_PERMISSIONS,
        roles::ORG_ADMIN => ORG_ADMIN_PERMISSIONS,
        roles::ORG_MEMBER => ORG_MEMBER_PERMISSIONS,
        roles::ORG_VIEWER => ORG_VIEWER_PERMISSIONS,
        roles::ORG_GUEST => ORG_GUEST_PERMISSIONS,
        _ => &[],
    }
}

pub fn has_permission(role: &str, permission: &str) -> bool {
    role_permissions(role).contains(&permission)
}

/// Union of the permissions of every role, deduplicated, in table order.
pub fn permissions_for_roles<S: AsRef<str>>(roles: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for role in roles {
        for perm in role_permissions(role.as_ref()) {
            if !out.iter().any(|p| p == perm) {
                out.push((*perm).to_string());
            }
        }
    }
    out
}

/// Scopes granted to interactive logins.
pub fn default_scopes() -> Vec<String> {
    [
        scopes::OPENID,
        scopes::EMAIL,
        scopes::PROFILE,
        scopes::READ_PROFILE,
        scopes::READ_ORGANIZATIONS,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Scopes an API key may be granted.
pub const API_KEY_SCOPES: &[&str] = &[
    scopes::READ_WORKFLOWS,
    scopes::WRITE_WORKFLOWS,
    scopes::EXECUTE_WORKFLOWS,
    scopes::READ_CONTENT,
    scopes::WRITE_CONTENT,
    scopes::EXECUTE_AI,
];
