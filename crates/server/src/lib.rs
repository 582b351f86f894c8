//! Corkboard sync server.
//!
//! This crate provides the network face of the service:
//! - WebSocket handshake authentication and the per-connection loop
//! - The session protocol (`now`, `ref`, `get`, `set`, `disconnect`) with
//!   optimistic versioning and `changed` fan-out
//! - The subscription registry and the shutdown execution gate

pub mod error;
pub mod gate;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod state;
pub mod subscriptions;
pub mod ws;

pub use error::{ApiError, ErrorResponse};
pub use gate::ExecutionGate;
pub use routes::create_router;
pub use session::{Disposition, Session};
pub use state::AppState;
pub use subscriptions::{ConnId, PeerHandle, Subscriptions};
