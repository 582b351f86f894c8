//! Durable blob storage for Corkboard.
//!
//! This crate provides:
//! - [`BlobStore`]: crash-atomic record files with sidecar-backup recovery
//! - [`KeyLocks`]: the per-key mutual exclusion callers must hold across a
//!   read-modify-write cycle

pub mod error;
pub mod locks;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use locks::{KeyGuard, KeyLocks};
pub use store::BlobStore;
