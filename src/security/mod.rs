//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (echo trusted origin, answer preflight)
//!     → rate_limit.rs (check per-IP token bucket)
//!     → Pass to authentication
//! ```
//!
//! # Design Decisions
//! - Fail closed: a client whose address cannot be determined is refused
//! - One coarse lock over the whole client map

pub mod cors;
pub mod rate_limit;

pub use rate_limit::{Clock, ManualClock, MonotonicClock, RateLimiter};
