//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Stages and handlers produce:
//!     → jsonlog.rs (leveled JSON lines, one per entry)
//!     → metrics.rs (atomic request/response counters)
//!
//! Consumers:
//!     → Log collectors reading the JSON-line sink (stdout by default)
//!     → /debug/vars introspection endpoint
//!     → Prometheus scrape (optional exporter)
//! ```
//!
//! # Design Decisions
//! - `tracing` events are routed into the same JSON sink through `JsonLayer`
//! - Metrics are cheap (atomic increments)

pub mod jsonlog;
pub mod metrics;

pub use jsonlog::{JsonLayer, JsonLogger, LogLevel, Properties};
pub use metrics::{MetricsSnapshot, RequestMetrics};
