//! Command-line flags layered over the config file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GateConfig;
use crate::config::validation::validate_config;
use crate::observability::jsonlog::LogLevel;

#[derive(Debug, Parser)]
#[command(name = "gatehouse")]
#[command(about = "Request gate: CORS, rate limiting and bearer-token authorization", long_about = None)]
pub struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Environment (development|staging|production).
    #[arg(long)]
    pub env: Option<String>,

    /// Rate limiter maximum requests per second.
    #[arg(long)]
    pub limiter_rps: Option<f64>,

    /// Rate limiter maximum burst.
    #[arg(long)]
    pub limiter_burst: Option<u32>,

    /// Enable rate limiter.
    #[arg(long)]
    pub limiter_enabled: Option<bool>,

    /// Trusted CORS origins (space separated).
    #[arg(long)]
    pub cors_trusted_origins: Option<String>,

    /// Minimum JSON log level (info|error|fatal|off).
    #[arg(long)]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    /// Load the config file (or defaults), apply the flags, validate.
    pub fn load(&self) -> Result<GateConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => GateConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut GateConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = match config.listener.bind_address.parse::<SocketAddr>() {
                Ok(mut addr) => {
                    addr.set_port(port);
                    addr.to_string()
                }
                Err(_) => format!("0.0.0.0:{port}"),
            };
        }
        if let Some(env) = &self.env {
            config.listener.env = env.clone();
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(origins) = &self.cors_trusted_origins {
            config.cors.trusted_origins = origins.split_whitespace().map(str::to_string).collect();
        }
        if let Some(level) = self.log_level {
            config.logging.min_level = level;
        }
    }
}
