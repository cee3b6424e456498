pub mod password;
pub mod token;

pub use password::{
    dummy_password_hash, hash_password, verify_password, Password, PasswordHashString,
};
