//! Request gate library.
//!
//! A middleware pipeline placed in front of a JSON HTTP API. Every request
//! passes through panic containment, metrics, CORS, per-client rate
//! limiting and bearer-token authentication; routes then opt into
//! authorization guards.

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GateConfig;
pub use http::{build_router, AppState, GateServer};
pub use lifecycle::Shutdown;
