//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
///
/// `AccessDenied` deliberately carries no detail: every token verification
/// failure collapses into it so the caller cannot distinguish a malformed
/// token from a bad signature.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Access denied")]
    AccessDenied,

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid bucket: {0}")]
    InvalidBucket(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("Reference is not provided")]
    ReferenceNotProvided,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
