pub mod auth;

pub use auth::{extract_credential, require_auth, require_scopes};
