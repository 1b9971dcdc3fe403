//! REST + WebSocket surface.
//!
//! Routes are nested under `/api/` and protected by a middleware stack:
//! Rate Limit → Auth → Audit → Role gate → Handler. The WebSocket endpoint
//! lives at `/ws/connect` and authenticates with a one-time ticket.

pub mod endpoints;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use router::api_router;
pub use server::{serve, start_server, ApiServer};
pub use types::ApiContext;
