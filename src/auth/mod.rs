pub mod password;
pub mod token;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// Re-export necessary items
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenIssuer};

lazy_static! {
    // Regex for username validation: alphanumeric, underscores, hyphens
    pub(crate) static ref USERNAME_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-zA-Z0-9_-]+$").expect("username regex is valid");
}

/// The authenticated principal attached to a call after session verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

/// Represents the payload for a new user registration request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Desired username for the new account.
    /// Must be between 3 and 50 characters, alphanumeric, and can include underscores or hyphens.
    #[validate(
        length(min = 3, max = 50),
        regex(
            path = "USERNAME_REGEX",
            message = "Username must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub username: String,
    /// Contact address. Must be a valid email and unique across users.
    #[validate(email, length(max = 100))]
    pub email: String,
    /// Password for the new account.
    /// Must be at least 6 characters long.
    #[validate(length(min = 6))]
    pub password: String,
    #[validate(length(max = 100))]
    pub full_name: Option<String>,
}

impl RegisterRequest {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            full_name: None,
        }
    }
}

/// Result of a successful `authenticate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    /// The signed session token.
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_register_request_validation() {
        let valid_register = RegisterRequest::new("test_user-123", "test@example.com", "password123");
        assert!(valid_register.validate().is_ok());

        // Contains space and exclamation
        let invalid_username_register =
            RegisterRequest::new("test user!", "test@example.com", "password123");
        assert!(invalid_username_register.validate().is_err());

        let short_username_register = RegisterRequest::new("tu", "test@example.com", "password123");
        assert!(short_username_register.validate().is_err());

        let short_password_register = RegisterRequest::new("test_user", "test@example.com", "123");
        assert!(short_password_register.validate().is_err());

        let invalid_email_register = RegisterRequest::new("test_user", "invalid-email", "password123");
        assert!(invalid_email_register.validate().is_err());

        let long_full_name = RegisterRequest {
            full_name: Some("x".repeat(101)),
            ..RegisterRequest::new("test_user", "test@example.com", "password123")
        };
        assert!(long_full_name.validate().is_err());
    }
}
