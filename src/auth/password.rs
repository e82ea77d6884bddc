use crate::error::AppError;
use bcrypt::{hash, verify};
use log::warn;

/// Hashes a plaintext password with bcrypt at the given cost.
///
/// bcrypt embeds a random salt in the output, so hashing the same password twice
/// yields different strings.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Checks a plaintext password against a stored bcrypt hash.
///
/// A malformed stored hash is treated as a mismatch.
pub fn verify_password(password: &str, hashed_password: &str) -> bool {
    match verify(password, hashed_password) {
        Ok(matches) => matches,
        Err(e) => {
            warn!("Rejecting password check against unreadable hash: {}", e);
            false
        }
    }
}
