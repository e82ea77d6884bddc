use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A registered account.
///
/// `password_hash` is never serialized, so a `User` can be handed to any adapter as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Unique across all users, deactivated ones included.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the account is deactivated. Deactivated users cannot sign in.
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Incremented on every successful update.
    pub version: i32,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }

    /// Applies the profile fields present in `patch`. The password is handled by the caller.
    pub fn apply(&mut self, patch: &UserPatch) {
        if let Some(username) = &patch.username {
            self.username = username.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(full_name) = &patch.full_name {
            self.full_name = full_name.clone();
        }
    }
}

/// Partial update of a user's own profile. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UserPatch {
    #[validate(
        length(min = 3, max = 50),
        regex(
            path = "crate::auth::USERNAME_REGEX",
            message = "Username must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub username: Option<String>,
    #[validate(email, length(max = 100))]
    pub email: Option<String>,
    /// `Some(None)` clears the full name.
    #[serde(default, deserialize_with = "super::double_option")]
    #[validate(length(max = 100))]
    pub full_name: Option<Option<String>>,
    /// New plaintext password; hashed before it reaches storage.
    #[validate(length(min = 6))]
    pub password: Option<String>,
    /// When set, the update fails with `Conflict` unless the stored version matches.
    pub expected_version: Option<i32>,
}
