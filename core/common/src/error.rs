//! Common error types for carecache.

use thiserror::Error;

/// Top-level error type for carecache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote fetch or transfer failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation refused because the device is offline.
    #[error("Offline: {0}")]
    Offline(String),

    /// Operation did not settle within its time bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credentials missing, invalid or expired.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but not allowed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl Error {
    /// Whether the fault is transient and the operation may succeed if
    /// attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
