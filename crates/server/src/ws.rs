//! WebSocket endpoint: handshake authentication and the connection loop.
//!
//! The upgrade request carries the bearer token (Authorization header or
//! `token` query parameter) and optionally `x-real-ip`. Verification
//! failure refuses the upgrade; a connection only ever exists with a
//! bucket attached.

use crate::error::ApiError;
use crate::protocol::Outbound;
use crate::session::{Disposition, Session};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use corkboard_core::{Bucket, UNKNOWN_IP};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Query parameters accepted by the sync endpoint.
#[derive(Debug, Deserialize)]
pub struct SyncParams {
    /// Bearer token; the query-parameter form of the handshake auth.
    pub token: Option<String>,
}

/// Extract a bearer token from the Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

/// Best-effort client origin: `x-real-ip`, else the socket peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Handler for `GET /v1/sync`.
pub async fn sync_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<SyncParams>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if state.is_shutting_down() {
        return ApiError::ShuttingDown.into_response();
    }

    let token = extract_bearer_token(&headers).or(params.token.as_deref());
    let bucket = match token.map(|t| state.verifier.verify(t)) {
        Some(Ok(bucket)) => bucket,
        _ => {
            tracing::info!(peer = %peer, "handshake refused");
            return ApiError::AccessDenied.into_response();
        }
    };

    let ip = client_ip(&headers, Some(peer));
    ws.on_upgrade(move |socket| handle_socket(socket, state, bucket, ip))
}

async fn handle_socket(socket: WebSocket, state: AppState, bucket: Bucket, ip: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    // The writer task owns the sink; acks and fan-out events from any task
    // funnel through the queue. It drains whatever is queued after the
    // session drops its sender, then closes the socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session::new(state, bucket, ip, outbound_tx);
    tracing::info!(
        conn = session.conn_id(),
        bucket = %session.bucket(),
        "connection established"
    );

    let mut close_reason: Option<String> = None;
    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                close_reason = Some(format!("transport error: {e}"));
                break;
            }
        };
        match message {
            Message::Text(text) => match session.handle_frame(text.as_str()).await {
                Disposition::Continue => {}
                Disposition::Close(reason) => {
                    close_reason = Some(reason);
                    break;
                }
            },
            Message::Close(frame) => {
                close_reason = frame.map(|f| f.reason.as_str().to_string());
                break;
            }
            Message::Binary(_) => {
                close_reason = Some("binary frames are not supported".to_string());
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    session.disconnect(close_reason.as_deref().unwrap_or("transport closed"));
    // Dropping the session drops its sender; the writer flushes and exits.
    drop(session);
    let _ = writer.await;
}
