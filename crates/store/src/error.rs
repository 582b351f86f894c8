//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
///
/// Missing and unparseable records are not errors: the read path reports
/// them as absence. Only real I/O failures (permissions, device) surface
/// here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
