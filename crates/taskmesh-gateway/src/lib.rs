//! HTTP surface for the control plane.
//!
//! One axum router serves both the registry routes (register, heartbeat,
//! unregister, agent listing) and the broker routes (task submission,
//! polling, cancellation, synchronous execution).

pub mod error;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, GatewayServer};
