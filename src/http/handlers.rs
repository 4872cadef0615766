//! Built-in endpoints served next to the application routes.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::auth::identity::RequestIdentity;
use crate::http::errors::ApiError;
use crate::http::server::AppState;
use crate::observability::MetricsSnapshot;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /v1/healthcheck`
pub async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "environment": state.config.listener.env,
        "version": VERSION,
    }))
}

/// `GET /debug/vars`
pub async fn debug_vars(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// `GET /v1/users/me`: the authenticated user, as resolved from the token.
pub async fn current_user(identity: RequestIdentity) -> Response {
    match identity {
        RequestIdentity::User(user) => Json(json!({ "user": user })).into_response(),
        RequestIdentity::Anonymous => ApiError::AuthenticationRequired.into_response(),
    }
}
