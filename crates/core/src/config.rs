//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Placeholder secret used when none is configured.
///
/// INSECURE: anyone who knows this string can mint tokens for any bucket.
/// The server logs a warning at startup when it is in effect.
pub const DEFAULT_TOKEN_SECRET: &str = "corkboard-insecure-dev-secret";

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl ServerConfig {
    /// Parse the bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address '{}': {e}", self.bind)))
    }

    /// Replace the port of the bind address, keeping the host.
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.bind_addr()?;
        addr.set_port(port);
        self.bind = addr.to_string();
        Ok(())
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for blob records.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("corkboard")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Token authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Process-wide secret for token signatures.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
}

fn default_token_secret() -> String {
    DEFAULT_TOKEN_SECRET.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Apply the bare environment variables `TOKEN_SECRET`, `STORAGE` and
    /// `PORT` on top of whatever file/prefixed-env configuration produced.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(secret) = std::env::var("TOKEN_SECRET") {
            self.auth.token_secret = secret;
        }
        if let Ok(root) = std::env::var("STORAGE") {
            self.storage.root = PathBuf::from(root);
        }
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| Error::Config(format!("invalid PORT '{port}': {e}")))?;
            self.server.set_port(port)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Returns warnings for insecure-but-allowed settings and an error for
    /// settings the server cannot run with.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        self.server.bind_addr()?;

        if self.auth.token_secret == DEFAULT_TOKEN_SECRET {
            warnings.push(
                "TOKEN_SECRET is the built-in placeholder; anyone can mint valid tokens. \
                 Set a real secret before exposing this server."
                    .to_string(),
            );
        }
        if self.auth.token_secret.is_empty() {
            return Err(Error::Config(
                "auth.token_secret must not be empty".to_string(),
            ));
        }

        Ok(warnings)
    }

    /// Create a test configuration rooted in the given directory.
    ///
    /// **For testing only.**
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            storage: StorageConfig { root: root.into() },
            auth: AuthConfig {
                token_secret: "test-token-secret".to_string(),
            },
        }
    }
}
