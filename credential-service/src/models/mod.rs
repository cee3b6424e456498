pub mod account;
pub mod api_key;
pub mod oauth;
pub mod session;
pub mod user;

pub use account::{Account, LOCAL_PROVIDER};
pub use api_key::{ApiKey, ApiKeyInfo};
pub use oauth::{OAuthState, ProviderTokens, ProviderUserInfo};
pub use session::{Session, SessionInfo};
pub use user::{normalize_email, User};
