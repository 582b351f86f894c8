//! Blob records and the identifiers that address them.
//!
//! A blob lives at a [`Key`]: the pair of a tenant [`Bucket`] and a 32-byte
//! [`BlobRef`]. The stored value is a [`BlobRecord`] carrying the payload,
//! a monotonic version counter and bookkeeping timestamps.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Maximum accepted length of the base64 payload text on the wire.
///
/// The decoded payload is bounded at 1 MiB; the current wire form bounds the
/// encoded text itself at the same figure.
pub const MAX_DATA_TEXT_LEN: usize = 0x10_0000;

/// Length of a reference in hexadecimal characters (32 bytes).
pub const REF_HEX_LEN: usize = 64;

/// The literal a client sends to detach from its current reference.
pub const REF_NONE: &str = "none";

/// Origin string recorded when the transport did not provide a client IP.
pub const UNKNOWN_IP: &str = "unknown";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A 32-byte blob reference, held as 64 lowercase hex characters.
///
/// Only constructible through [`BlobRef::parse`], so a value in hand is
/// always well-formed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobRef(String);

impl BlobRef {
    /// Parse a reference, normalizing case.
    ///
    /// Accepts exactly 64 hexadecimal characters; mixed case is lowered.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != REF_HEX_LEN {
            return Err(Error::InvalidReference(format!(
                "expected {} hex characters, got {}",
                REF_HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidReference(
                "contains non-hexadecimal characters".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The two-character shard prefix used in the storage layout.
    pub fn shard_prefix(&self) -> &str {
        &self.0[..2]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The argument of a `ref` message: attach to a reference or detach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    /// The `"none"` marker: drop the current subscription.
    Detach,
    /// Watch the given reference.
    Ref(BlobRef),
}

impl RefTarget {
    pub fn parse(s: &str) -> Result<Self> {
        if s == REF_NONE {
            return Ok(Self::Detach);
        }
        BlobRef::parse(s).map(Self::Ref)
    }
}

/// A tenant namespace, drawn from the connection token's claim.
///
/// Buckets become filesystem path components, so construction rejects
/// anything that could escape the storage root: separators, traversal
/// sequences, leading dots, and characters outside `[A-Za-z0-9._-]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bucket(String);

/// Maximum accepted bucket name length.
const MAX_BUCKET_LEN: usize = 128;

impl Bucket {
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidBucket("empty bucket name".to_string()));
        }
        if s.len() > MAX_BUCKET_LEN {
            return Err(Error::InvalidBucket(format!(
                "bucket name exceeds {MAX_BUCKET_LEN} characters"
            )));
        }
        if s.starts_with('.') {
            return Err(Error::InvalidBucket(
                "bucket name may not start with a dot".to_string(),
            ));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(Error::InvalidBucket(
                "bucket name contains unsafe characters".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bucket({})", self.0)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of locking and subscription: one reference in one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    pub bucket: Bucket,
    pub blob_ref: BlobRef,
}

impl Key {
    pub fn new(bucket: Bucket, blob_ref: BlobRef) -> Self {
        Self { bucket, blob_ref }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.blob_ref)
    }
}

/// One stored blob: the on-wire and on-disk representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Opaque payload as base64 text.
    pub data: String,
    /// Monotonic version counter, starting at 1.
    pub version: u64,
    /// Milliseconds since epoch of the first write; never mutated.
    pub created: i64,
    /// Milliseconds since epoch of the last update; absent on version 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    /// Best-effort client origin of the last writer.
    pub ip: String,
}

impl BlobRecord {
    /// The record written by the first successful `set` on a key.
    pub fn initial(data: String, ip: String) -> Self {
        Self {
            data,
            version: 1,
            created: now_ms(),
            updated: None,
            ip,
        }
    }

    /// The record replacing `self` after a version-matched `set`.
    pub fn next_version(&self, data: String, ip: String) -> Self {
        Self {
            data,
            version: self.version + 1,
            created: self.created,
            updated: Some(now_ms()),
            ip,
        }
    }
}

/// Validate a `set` payload: base64 text within the wire bound.
pub fn validate_data(data: &str) -> Result<()> {
    if data.len() > MAX_DATA_TEXT_LEN {
        return Err(Error::InvalidData(format!(
            "payload exceeds {MAX_DATA_TEXT_LEN} base64 characters"
        )));
    }
    BASE64
        .decode(data)
        .map_err(|_| Error::InvalidData("payload is not valid base64".to_string()))?;
    Ok(())
}

/// Validate an optional client-supplied version: positive when present.
pub fn validate_version(version: Option<u64>) -> Result<()> {
    match version {
        Some(0) => Err(Error::InvalidVersion(
            "version must be a positive integer".to_string(),
        )),
        _ => Ok(()),
    }
}
