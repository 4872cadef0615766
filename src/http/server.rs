//! HTTP server setup.
//!
//! # Responsibilities
//! - Hold the shared application state handed to every stage
//! - Wire the stage chain around the application routes
//! - Bind the server to a listener and run the limiter janitor beside it
//! - Stop gracefully on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{Method, Uri},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::authenticate::authenticate;
use crate::auth::store::{PermissionStore, UserStore};
use crate::config::GateConfig;
use crate::http::errors::ApiError;
use crate::http::handlers;
use crate::http::recover::recover_panic;
use crate::lifecycle::Shutdown;
use crate::observability::jsonlog::{JsonLogger, Properties};
use crate::observability::metrics::{record_metrics, RequestMetrics};
use crate::security::cors::enable_cors;
use crate::security::rate_limit::{rate_limit, RateLimiter};

/// Application state injected into every stage and handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub logger: JsonLogger,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<RequestMetrics>,
    pub users: Arc<dyn UserStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl AppState {
    pub fn new(
        config: GateConfig,
        logger: JsonLogger,
        users: Arc<dyn UserStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.limiter.clone()));
        Self {
            config: Arc::new(config),
            logger,
            limiter,
            metrics: Arc::new(RequestMetrics::new()),
            users,
            permissions,
        }
    }

    /// Replace the limiter, e.g. with one driven by a manual clock.
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    /// Render `err`. Server errors are logged here with the request line,
    /// so no other stage logs them again.
    pub fn error_response(&self, method: &Method, uri: &Uri, err: ApiError) -> Response {
        if let Some(cause) = err.cause() {
            let properties = Properties::from([
                ("request_method".to_string(), method.to_string()),
                ("request_url".to_string(), uri.to_string()),
            ]);
            self.logger.print_error(&cause, Some(&properties));
        }
        err.into_response()
    }
}

/// Merge `routes` with the built-in endpoints and wrap them in the stage
/// chain. Outermost first: trace, recover, metrics, CORS, rate limit,
/// authenticate, request timeout.
#[allow(deprecated)]
pub fn build_router(state: AppState, routes: Router<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);

    routes
        .route("/v1/healthcheck", get(handlers::healthcheck))
        .route("/debug/vars", get(handlers::debug_vars))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(from_fn_with_state(state.clone(), enable_cors))
        .layer(from_fn_with_state(state.clone(), record_metrics))
        .layer(from_fn_with_state(state.clone(), recover_panic))
        // Server errors are logged by `AppState::error_response`.
        .layer(TraceLayer::new_for_http().on_failure(()))
        .with_state(state)
}

/// HTTP server for the gate.
pub struct GateServer {
    state: AppState,
}

impl GateServer {
    pub fn new(
        config: GateConfig,
        logger: JsonLogger,
        users: Arc<dyn UserStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self::from_state(AppState::new(config, logger, users, permissions))
    }

    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The full router for `routes`, ready to serve.
    pub fn router(&self, routes: Router<AppState>) -> Router {
        build_router(self.state.clone(), routes)
    }

    /// Serve `routes` on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        routes: Router<AppState>,
        shutdown: &Shutdown,
    ) -> Result<(), io::Error> {
        let mut stop = shutdown.subscribe();
        let janitor = self
            .state
            .limiter
            .is_enabled()
            .then(|| Arc::clone(&self.state.limiter).spawn_janitor(shutdown.subscribe()));

        let addr = listener.local_addr()?;
        let properties = Properties::from([
            ("addr".to_string(), addr.to_string()),
            ("env".to_string(), self.state.config.listener.env.clone()),
        ]);
        self.state
            .logger
            .print_info("starting server", Some(&properties));

        let app = self
            .router(routes)
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        if let Some(janitor) = janitor {
            if let Err(err) = janitor.await {
                tracing::error!(error = %err, "Rate limiter janitor failed");
            }
        }

        self.state
            .logger
            .print_info("stopped server", Some(&properties));
        Ok(())
    }
}
