//! Core domain types for Corkboard.
//!
//! This crate provides:
//! - Blob records and the identifiers addressing them (references, buckets,
//!   keys) with their validation rules
//! - Connection token minting and verification
//! - Configuration types shared by the server and the CLI

pub mod blob;
pub mod config;
pub mod error;
pub mod token;

pub use blob::{
    BlobRecord, BlobRef, Bucket, Key, MAX_DATA_TEXT_LEN, REF_NONE, RefTarget, UNKNOWN_IP, now_ms,
    validate_data, validate_version,
};
pub use config::{AppConfig, AuthConfig, DEFAULT_TOKEN_SECRET, ServerConfig, StorageConfig};
pub use error::{Error, Result};
pub use token::{TokenSigner, TokenVerifier};
