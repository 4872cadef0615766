//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, stage chain, ConnectInfo)
//!     → recover.rs (panic → 500, connection closed)
//!     → [metrics → CORS → rate limit → authenticate]
//!     → [route guards] → handler
//!     → errors.rs (rejections rendered as JSON envelopes)
//! ```

pub mod errors;
pub mod handlers;
pub mod recover;
pub mod server;

pub use errors::ApiError;
pub use server::{build_router, AppState, GateServer};
