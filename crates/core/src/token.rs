//! Connection tokens: HMAC-signed bucket claims.
//!
//! A token is `base64url(claims_json) "." base64url(hmac_sha256(claims_b64))`
//! where the claims carry the bucket the connection is authorized for. The
//! verifier collapses every failure into [`Error::AccessDenied`] so callers
//! never learn whether the shape, the signature or the claim was at fault.

use crate::blob::{Bucket, now_ms};
use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The claims payload carried inside a token.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    bucket: String,
    /// Milliseconds since epoch at mint time. Informational only; tokens do
    /// not expire.
    #[serde(default)]
    iat: i64,
}

fn mac_for(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length")
}

/// Mints signed connection tokens. Used by the CLI and by tests.
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Produce a fresh token granting access to `bucket`.
    pub fn mint(&self, bucket: &Bucket) -> String {
        let claims = serde_json::json!({
            "bucket": bucket.as_str(),
            "iat": now_ms(),
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let mut mac = mac_for(&self.secret);
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{payload}.{signature}")
    }
}

/// Verifies connection tokens against the process-wide secret.
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Decode a token into the bucket it authorizes.
    ///
    /// The signature check runs in constant time (`Mac::verify_slice`).
    pub fn verify(&self, token: &str) -> Result<Bucket> {
        let (payload, signature) = token.split_once('.').ok_or(Error::AccessDenied)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::AccessDenied)?;

        let mut mac = mac_for(&self.secret);
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::AccessDenied)?;

        let claims = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| Error::AccessDenied)?;
        let claims: TokenClaims =
            serde_json::from_slice(&claims).map_err(|_| Error::AccessDenied)?;

        Bucket::parse(&claims.bucket).map_err(|_| Error::AccessDenied)
    }
}
