//! Store error types
//!
//! Defines all errors that can occur in the local and remote store layers.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in a metric entry store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Read/update/delete of an unknown entry id
    #[error("Entry not found: {0}")]
    NotFound(Uuid),

    /// Create collision; callers use this deliberately to implement upsert
    #[error("Duplicate entry id: {0}")]
    DuplicateId(Uuid),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote store request failed
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Remote store unreachable (connect failure or timeout)
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = StoreError::NotFound(id);
        assert_eq!(
            err.to_string(),
            format!("Entry not found: {}", id)
        );

        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Remote store unavailable: connection refused"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
