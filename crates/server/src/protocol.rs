//! Wire protocol: JSON text frames over the WebSocket.
//!
//! Client frames are envelopes `{"id": <n>, "action": "...", ...}`. The
//! `id` correlates the server's ack; a frame whose action requires an ack
//! but that carries no id is a protocol violation and closes the
//! connection. Server frames are acks `{"id": <n>, ...}` and the broadcast
//! event `{"event": "changed"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client request, dispatched on the `action` field.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    /// Server wall-clock probe.
    Now,
    /// Attach to a reference (or `"none"` to detach).
    Ref {
        #[serde(rename = "ref")]
        target: String,
    },
    /// Read the current blob, optionally short-circuiting a known version.
    Get {
        #[serde(default)]
        known: Option<u64>,
    },
    /// Optimistically write the blob.
    Set {
        data: String,
        #[serde(default)]
        version: Option<u64>,
    },
    /// Orderly goodbye; the reason is logged.
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Request {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Now => "now",
            Self::Ref { .. } => "ref",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// A parsed client frame.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub id: Option<u64>,
    pub request: Request,
}

/// Result of decoding one text frame.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A well-formed envelope.
    Frame(Envelope),
    /// Schema failure on a frame that still carried an ack id; answered as
    /// a validation-error ack.
    Invalid { id: u64, error: String },
    /// Not answerable: not JSON, or schema failure with no ack id.
    Violation(String),
}

/// Decode a text frame.
pub fn parse_frame(text: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return ParseOutcome::Violation(format!("frame is not JSON: {e}")),
    };
    let id = value.get("id").and_then(Value::as_u64);

    match serde_json::from_value::<Request>(value) {
        Ok(request) => ParseOutcome::Frame(Envelope { id, request }),
        Err(e) => match id {
            Some(id) => ParseOutcome::Invalid {
                id,
                error: format!("invalid message: {e}"),
            },
            None => ParseOutcome::Violation(format!("invalid message: {e}")),
        },
    }
}

/// The payload of an ack.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AckBody {
    /// Any surfaced failure: validation, missing reference, storage I/O.
    Error { error: String },
    /// `now` response.
    Now { timestamp: i64 },
    /// `ref` success.
    Ref { success: bool },
    /// `get` response. Both fields absent is the absent-blob marker; a bare
    /// `version` is the known-version shortcut.
    Get {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    /// `set` response. On conflict `success` is false and `data`/`version`
    /// carry the current record so the client can reconcile.
    Set {
        success: bool,
        version: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
}

/// A server-to-client frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Ack {
        id: u64,
        #[serde(flatten)]
        body: AckBody,
    },
    Event { event: &'static str },
}

impl Outbound {
    /// The `changed` broadcast, emitted to peers after a successful write.
    pub fn changed() -> Self {
        Self::Event { event: "changed" }
    }
}
