//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::jsonlog::LogLevel;

/// Root configuration for the request gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address, environment name).
    pub listener: ListenerConfig,

    /// Per-client rate limiting.
    pub limiter: LimiterConfig,

    /// Cross-origin request settings.
    pub cors: CorsConfig,

    /// Credential and permission lookup settings.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// JSON log sink settings.
    pub logging: LoggingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,

    /// Environment name reported by the healthcheck (development|staging|production).
    pub env: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            env: "development".to_string(),
        }
    }
}

/// Token-bucket rate limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Tokens refilled per second for each client.
    pub requests_per_second: f64,

    /// Bucket capacity.
    pub burst: u32,

    /// How often the janitor sweeps stale clients, in seconds.
    pub sweep_interval_secs: u64,

    /// A client unseen for longer than this is dropped by the janitor, in seconds.
    pub stale_after_secs: u64,
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst: 4,
            sweep_interval_secs: 60,
            stale_after_secs: 180,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests (exact match).
    pub trusted_origins: Vec<String>,
}

/// Authentication collaborator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deadline for a single user or permission lookup, in milliseconds.
    pub lookup_timeout_ms: u64,
}

impl AuthConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 3000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// JSON log sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Entries below this level are dropped.
    pub min_level: LogLevel,

    /// `tracing` filter directives for internal diagnostics.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            filter: "gatehouse=info".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus scrape endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
