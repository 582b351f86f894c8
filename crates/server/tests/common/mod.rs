//! Common test utilities and fixtures.

use corkboard_core::{AppConfig, Bucket, TokenSigner, UNKNOWN_IP};
use corkboard_server::protocol::Outbound;
use corkboard_server::{AppState, Session};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Secret matching `AppConfig::for_testing`.
pub const TEST_SECRET: &str = "test-token-secret";

/// A test application with temporary storage.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestApp {
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestApp {
    /// Create application state over a temporary storage root.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path().join("storage"));
        let state = AppState::new(config)
            .await
            .expect("Failed to create application state");
        Self {
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Open a session directly, bypassing the transport. Returns the
    /// session and the receiving end of its outbound queue.
    pub fn session(&self, bucket: &str) -> (Session, UnboundedReceiver<Outbound>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let session = Session::new(
            self.state.clone(),
            Bucket::parse(bucket).expect("test bucket"),
            UNKNOWN_IP.to_string(),
            tx,
        );
        (session, rx)
    }

    /// Mint a token the test state's verifier accepts.
    pub fn mint_token(&self, bucket: &str) -> String {
        TokenSigner::new(TEST_SECRET).mint(&Bucket::parse(bucket).expect("test bucket"))
    }
}

/// A 64-char reference made of one repeated hex byte.
#[allow(dead_code)]
pub fn hex_ref(hex_byte: &str) -> String {
    hex_byte.repeat(32)
}
