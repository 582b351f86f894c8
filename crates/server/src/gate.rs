//! Process-wide drain coordination.
//!
//! Every protocol handler holds the gate's read side for its duration;
//! shutdown takes the write side, which can only succeed once no handler
//! is executing. Handlers acquire the gate before any key lock and release
//! it after, so shutdown never queues behind a key lock indirectly.

use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer gate wrapped around every request handler.
#[derive(Default)]
pub struct ExecutionGate {
    lock: RwLock<()>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter as a request handler. Held for the handler's whole duration.
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Drain for shutdown: wait until no handler is executing, bounded by
    /// `timeout`. Returns the exclusive guard on success and `None` on
    /// timeout, in which case shutdown proceeds anyway.
    pub async fn drain(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, ()>> {
        tokio::time::timeout(timeout, self.lock.write()).await.ok()
    }
}
