//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → cli.rs (flag overrides, re-validated)
//!     → GateConfig (validated, immutable)
//!     → shared via Arc to every stage through AppState
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, CorsConfig, GateConfig, LimiterConfig, ListenerConfig, LoggingConfig,
    ObservabilityConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
