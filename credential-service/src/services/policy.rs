//! Password policy.
//!
//! Every rule is evaluated so callers can report all failures at once.

/// Characters accepted as "special".
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { min_length: usize, actual_length: usize },
    TooLong { max_length: usize, actual_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSpecial,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyViolation::TooLong {
                max_length,
                actual_length,
            } => write!(
                f,
                "Password must be at most {} characters (got {})",
                max_length, actual_length
            ),
            PolicyViolation::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyViolation::MissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyViolation::MissingDigit => write!(f, "Password must contain at least one number"),
            PolicyViolation::MissingSpecial => write!(
                f,
                "Password must contain at least one special character ({})",
                SPECIAL_CHARACTERS
            ),
        }
    }
}

pub struct PasswordPolicy;

impl PasswordPolicy {
    /// Returns every violated rule, or Ok when the password passes.
    pub fn validate(password: &str) -> Result<(), Vec<PolicyViolation>> {
        let mut violations = Vec::new();
        let length = password.chars().count();

        if length < MIN_PASSWORD_LENGTH {
            violations.push(PolicyViolation::TooShort {
                min_length: MIN_PASSWORD_LENGTH,
                actual_length: length,
            });
        }
        if length > MAX_PASSWORD_LENGTH {
            violations.push(PolicyViolation::TooLong {
                max_length: MAX_PASSWORD_LENGTH,
                actual_length: length,
            });
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push(PolicyViolation::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push(PolicyViolation::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::MissingDigit);
        }
        if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            violations.push(PolicyViolation::MissingSpecial);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
