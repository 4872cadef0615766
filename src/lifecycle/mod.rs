//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting, drains → janitor exits
//! ```
//!
//! Startup failures are fatal: the binary logs them at FATAL and exits 1.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
