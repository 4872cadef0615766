//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and returns every
//! problem found, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GateConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a valid socket address")]
    BindAddress(String),

    #[error("limiter.requests_per_second must be a positive finite number, got {0}")]
    RequestsPerSecond(f64),

    #[error("limiter.burst must be at least 1 when the limiter is enabled")]
    ZeroBurst,

    #[error("limiter.sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,

    #[error("limiter.stale_after_secs must be greater than zero")]
    ZeroStaleAfter,

    #[error("auth.lookup_timeout_ms must be greater than zero")]
    ZeroLookupTimeout,

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("cors.trusted_origins contains a blank entry")]
    BlankOrigin,
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let limiter = &config.limiter;
    if limiter.enabled {
        let rps = limiter.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            errors.push(ValidationError::RequestsPerSecond(rps));
        }
        if limiter.burst == 0 {
            errors.push(ValidationError::ZeroBurst);
        }
    }
    if limiter.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    }
    if limiter.stale_after_secs == 0 {
        errors.push(ValidationError::ZeroStaleAfter);
    }

    if config.auth.lookup_timeout_ms == 0 {
        errors.push(ValidationError::ZeroLookupTimeout);
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config
        .cors
        .trusted_origins
        .iter()
        .any(|origin| origin.trim().is_empty())
    {
        errors.push(ValidationError::BlankOrigin);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
