//! Request gate
//!
//! ```text
//!     Client Request
//!     ──────────────▶ recover ─▶ metrics ─▶ CORS ─▶ rate limit ─▶ authenticate
//!                                                                    │
//!                                                                    ▼
//!     Client Response                                          route guards
//!     ◀────────────────────────────────────────────────────────  + handler
//! ```

use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatehouse::auth::{require_activated_user, MemoryStore};
use gatehouse::config::Cli;
use gatehouse::http::handlers::current_user;
use gatehouse::lifecycle::{wait_for_signal, Shutdown};
use gatehouse::observability::jsonlog::{JsonLayer, JsonLogger, LogLevel, Properties};
use gatehouse::observability::metrics::init_exporter;
use gatehouse::{AppState, GateServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.load() {
        Ok(config) => config,
        Err(err) => JsonLogger::stdout(LogLevel::Info).print_fatal(&err, None),
    };

    let logger = JsonLogger::stdout(config.logging.min_level);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(JsonLayer::new(logger.clone()))
        .try_init()?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(err) = init_exporter(addr) {
                    logger.print_error(&err, None);
                }
            }
            Err(err) => logger.print_error(&err, None),
        }
    }

    // Persistence is external; the in-memory store serves local runs.
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(config.clone(), logger.clone(), store.clone(), store);

    let routes = Router::new().route(
        "/v1/users/me",
        get(current_user).route_layer(require_activated_user(&state)),
    );

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            let properties = Properties::from([(
                "addr".to_string(),
                config.listener.bind_address.clone(),
            )]);
            logger.print_fatal(&err, Some(&properties))
        }
    };

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        let properties = Properties::from([("signal".to_string(), signal.to_string())]);
        signal_logger.print_info("shutting down server", Some(&properties));
        trigger.trigger();
    });

    if let Err(err) = GateServer::from_state(state)
        .run(listener, routes, &shutdown)
        .await
    {
        logger.print_fatal(&err, None);
    }

    Ok(())
}
