//!
//! # Custom Error Handling
//!
//! This module defines `AppError`, the error type returned by every operation of the
//! shared core. Protocol adapters (REST, GraphQL, WebSocket) match on its variants to
//! pick a transport-specific representation; the core itself never maps errors to
//! status codes or frames.
//!
//! `From` conversions are provided for `validator::ValidationErrors` and the
//! persistence layer's `StoreError`, so handlers can use the `?` operator throughout.

use thiserror::Error;
use validator::ValidationErrors;

use crate::store::StoreError;

/// Reasons a session token can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token is not a structurally valid JWT, or its claims cannot be decoded.
    #[error("malformed token")]
    Malformed,
    /// The token was tampered with or signed under a different key.
    #[error("token signature is invalid")]
    SignatureInvalid,
    /// The token is past its expiry timestamp.
    #[error("token has expired")]
    Expired,
}

/// Represents all possible errors that can occur within the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// The referenced entity does not exist.
    #[error("Not Found: {0}")]
    NotFound(String),
    /// The identity is authenticated but the policy denies the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// A uniqueness constraint or an optimistic version check failed.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Input failed field validation. Raised before persistence is touched.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),
    /// Credentials were rejected, or the session's principal is no longer active.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The session token was rejected.
    #[error("Invalid token: {0}")]
    Token(#[from] TokenError),
    /// Durable storage could not be reached or timed out. Callers may retry.
    #[error("Storage Unavailable: {0}")]
    StorageUnavailable(String),
    /// Unexpected failure inside the core (hashing, signing, task join).
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns `true` when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

/// Converts persistence failures into the core taxonomy.
///
/// Storage-specific details are kept in `StoreError` and logged at the gateway;
/// only a generic message reaches the caller for unavailability.
impl From<StoreError> for AppError {
    fn from(error: StoreError) -> AppError {
        match error {
            StoreError::NotFound(entity) => AppError::NotFound(format!("{} not found", entity)),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Unavailable(_) => {
                AppError::StorageUnavailable("storage is temporarily unavailable".into())
            }
        }
    }
}

/// Converts `validator::ValidationErrors` into `AppError::InvalidInput`.
///
/// The detailed validation messages are preserved.
impl From<ValidationErrors> for AppError {
    fn from(error: ValidationErrors) -> AppError {
        AppError::InvalidInput(error.to_string())
    }
}
