//! Connection session: one live bearer of a bucket identity.
//!
//! A session owns at most one current reference and dispatches the five
//! protocol messages. Every dispatch holds the execution gate's read side
//! for its duration, acquired before and released after any key lock.
//! Failures surface inside the ack envelope and never terminate the
//! connection; the one exception is a message that requires an ack but
//! carries no ack id, which is a protocol violation.

use crate::protocol::{AckBody, Envelope, Outbound, ParseOutcome, Request, parse_frame};
use crate::state::AppState;
use crate::subscriptions::{ConnId, PeerHandle};
use corkboard_core::{
    BlobRecord, BlobRef, Bucket, Error, Key, RefTarget, validate_data, validate_version,
};
use tokio::sync::mpsc::UnboundedSender;

/// What the connection loop should do after a frame was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Tear the connection down, logging the given reason.
    Close(String),
}

/// Per-connection protocol state.
pub struct Session {
    state: AppState,
    conn_id: ConnId,
    bucket: Bucket,
    ip: String,
    outbound: UnboundedSender<Outbound>,
    current: Option<BlobRef>,
}

impl Session {
    pub fn new(
        state: AppState,
        bucket: Bucket,
        ip: String,
        outbound: UnboundedSender<Outbound>,
    ) -> Self {
        let conn_id = state.next_conn_id();
        Self {
            state,
            conn_id,
            bucket,
            ip,
            outbound,
            current: None,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Decode and dispatch one text frame.
    pub async fn handle_frame(&mut self, text: &str) -> Disposition {
        match parse_frame(text) {
            ParseOutcome::Frame(envelope) => self.handle(envelope).await,
            ParseOutcome::Invalid { id, error } => {
                self.ack(id, AckBody::Error { error });
                Disposition::Continue
            }
            ParseOutcome::Violation(reason) => Disposition::Close(reason),
        }
    }

    /// Dispatch a parsed envelope.
    pub async fn handle(&mut self, envelope: Envelope) -> Disposition {
        let state = self.state.clone();
        let _permit = state.gate.shared().await;

        match (envelope.id, envelope.request) {
            (_, Request::Disconnect { reason }) => {
                Disposition::Close(reason.unwrap_or_else(|| "client disconnect".to_string()))
            }
            (None, request) => Disposition::Close(format!(
                "message '{}' carries no ack id",
                request.action_name()
            )),
            (Some(id), Request::Now) => {
                self.ack(id, self.on_now());
                Disposition::Continue
            }
            (Some(id), Request::Ref { target }) => {
                let body = self.on_ref(&target);
                self.ack(id, body);
                Disposition::Continue
            }
            (Some(id), Request::Get { known }) => {
                let body = self.on_get(known).await;
                self.ack(id, body);
                Disposition::Continue
            }
            (Some(id), Request::Set { data, version }) => {
                let (body, peers) = self.on_set(data, version).await;
                self.ack(id, body);
                for peer in &peers {
                    peer.send(Outbound::changed());
                }
                Disposition::Continue
            }
        }
    }

    /// Remove the session from the registry and log the reason. Called
    /// exactly once, before the connection releases its own resources.
    pub fn disconnect(&mut self, reason: &str) {
        if let Some(current) = self.current.take() {
            let key = Key::new(self.bucket.clone(), current);
            self.state.subscriptions.remove(&key, self.conn_id);
        }
        tracing::info!(
            conn = self.conn_id,
            bucket = %self.bucket,
            reason = %reason,
            "connection closed"
        );
    }

    fn ack(&self, id: u64, body: AckBody) {
        // Dropped silently when the connection's writer is already gone.
        let _ = self.outbound.send(Outbound::Ack { id, body });
    }

    fn on_now(&self) -> AckBody {
        AckBody::Now {
            timestamp: corkboard_core::now_ms(),
        }
    }

    fn on_ref(&mut self, target: &str) -> AckBody {
        let target = match RefTarget::parse(target) {
            Ok(target) => target,
            // The prior subscription stays intact on a validation failure.
            Err(e) => {
                return AckBody::Error {
                    error: e.to_string(),
                };
            }
        };

        if let Some(previous) = self.current.take() {
            let key = Key::new(self.bucket.clone(), previous);
            self.state.subscriptions.remove(&key, self.conn_id);
        }
        if let RefTarget::Ref(blob_ref) = target {
            let key = Key::new(self.bucket.clone(), blob_ref.clone());
            self.state
                .subscriptions
                .add(&key, PeerHandle::new(self.conn_id, self.outbound.clone()));
            self.current = Some(blob_ref);
        }

        AckBody::Ref { success: true }
    }

    async fn on_get(&self, known: Option<u64>) -> AckBody {
        let Some(current) = &self.current else {
            return error_ack(Error::ReferenceNotProvided);
        };
        if let Err(e) = validate_version(known) {
            return error_ack(e);
        }

        let key = Key::new(self.bucket.clone(), current.clone());
        let _lock = self.state.locks.acquire(&key).await;

        match self.state.store.read(&key).await {
            Ok(None) => AckBody::Get {
                data: None,
                version: None,
            },
            // The client already holds this version; skip the payload. The
            // hint is never trusted beyond that.
            Ok(Some(record)) if known == Some(record.version) => AckBody::Get {
                data: None,
                version: Some(record.version),
            },
            Ok(Some(record)) => AckBody::Get {
                data: Some(record.data),
                version: Some(record.version),
            },
            Err(e) => self.storage_error(&key, "get", e),
        }
    }

    async fn on_set(&self, data: String, version: Option<u64>) -> (AckBody, Vec<PeerHandle>) {
        let Some(current) = &self.current else {
            return (error_ack(Error::ReferenceNotProvided), Vec::new());
        };
        if let Err(e) = validate_data(&data) {
            return (error_ack(e), Vec::new());
        }
        if let Err(e) = validate_version(version) {
            return (error_ack(e), Vec::new());
        }

        let key = Key::new(self.bucket.clone(), current.clone());
        let _lock = self.state.locks.acquire(&key).await;

        let existing = match self.state.store.read(&key).await {
            Ok(existing) => existing,
            Err(e) => return (self.storage_error(&key, "set", e), Vec::new()),
        };

        let record = match existing {
            // First write: the request version is ignored.
            None => BlobRecord::initial(data, self.ip.clone()),
            Some(ref current_record) if version == Some(current_record.version) => {
                current_record.next_version(data, self.ip.clone())
            }
            // Stale writer: hand back the current record to reconcile.
            Some(current_record) => {
                return (
                    AckBody::Set {
                        success: false,
                        version: current_record.version,
                        data: Some(current_record.data),
                    },
                    Vec::new(),
                );
            }
        };

        if let Err(e) = self.state.store.write(&key, &record).await {
            return (self.storage_error(&key, "set", e), Vec::new());
        }

        // Snapshot peers after the write is durable; the caller acks first
        // and then emits to this snapshot.
        let peers = self.state.subscriptions.peers(&key, self.conn_id);
        (
            AckBody::Set {
                success: true,
                version: record.version,
                data: None,
            },
            peers,
        )
    }

    fn storage_error(&self, key: &Key, op: &str, e: corkboard_store::StoreError) -> AckBody {
        tracing::error!(
            conn = self.conn_id,
            key = %key,
            op = %op,
            error = %e,
            "storage operation failed"
        );
        AckBody::Error {
            error: format!("storage error: {e}"),
        }
    }
}

fn error_ack(e: Error) -> AckBody {
    AckBody::Error {
        error: e.to_string(),
    }
}
