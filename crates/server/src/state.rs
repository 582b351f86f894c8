//! Application state shared across connections.

use crate::gate::ExecutionGate;
use crate::subscriptions::{ConnId, Subscriptions};
use corkboard_core::{AppConfig, TokenVerifier};
use corkboard_store::{BlobStore, KeyLocks, StoreResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Durable blob storage.
    pub store: Arc<BlobStore>,
    /// Per-key write locks.
    pub locks: Arc<KeyLocks>,
    /// Who is watching which key.
    pub subscriptions: Arc<Subscriptions>,
    /// Shutdown drain coordination.
    pub gate: Arc<ExecutionGate>,
    /// Handshake token verification.
    pub verifier: Arc<TokenVerifier>,
    shutting_down: Arc<AtomicBool>,
    next_conn_id: Arc<AtomicU64>,
}

impl AppState {
    /// Create the application state, opening the storage root.
    pub async fn new(config: AppConfig) -> StoreResult<Self> {
        let store = BlobStore::open(config.storage.root.clone()).await?;
        let verifier = TokenVerifier::new(config.auth.token_secret.as_bytes());

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            locks: Arc::new(KeyLocks::new()),
            subscriptions: Arc::new(Subscriptions::new()),
            gate: Arc::new(ExecutionGate::new()),
            verifier: Arc::new(verifier),
            shutting_down: Arc::new(AtomicBool::new(false)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Allocate a connection identifier.
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Refuse new handshakes from now on; existing handlers keep running
    /// until the gate drains.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
