//! Authentication core: token issuance, sessions, API keys, OAuth linking
//! and the facade composing them.

pub mod api_key;
pub mod auth;
mod compensation;
pub mod context;
pub mod email;
pub mod error;
pub mod hooks;
pub mod issuance;
pub mod jwt;
pub mod oauth;
pub mod permissions;
pub mod policy;
pub mod rate_limit;
pub mod session;
pub mod telemetry;
pub mod verification;

pub use api_key::{ApiKeyManager, CreatedApiKey, KeyEnvironment, NewApiKey};
pub use auth::{AuthService, Credential};
pub use context::AuthContext;
pub use email::{LogMailSender, MailSender, MockMailSender, SentMail, SmtpMailSender};
pub use error::{AuthError, ProviderError};
pub use hooks::{LockoutPolicy, LoginAttempt, MembershipRoles, NoLockout, RoleResolver};
pub use issuance::{AuthResult, ClientInfo, CredentialIssuer};
pub use jwt::{JwtService, RefreshLifetime, TokenPair};
pub use oauth::{CallbackParams, OAuthOrchestrator, OAuthProvider, OAuthStateStore};
pub use rate_limit::{ApiKeyRateLimiter, GovernorRateLimiter, Unlimited};
pub use session::SessionManager;
pub use telemetry::{TelemetryJob, TelemetryQueue};
pub use verification::{VerificationTokens, VERIFICATION_TTL};
