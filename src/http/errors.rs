//! Request outcomes rendered by the stages.
//!
//! Every rejection is a JSON envelope `{"error": "<message>"}`. Server
//! errors keep their cause for the log and show the client a generic
//! message.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("invalid or missing authentication token")]
    InvalidToken,

    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The cause is logged, never rendered.
    #[error("the server encountered a problem and could not process your request")]
    Internal(String),
}

impl ApiError {
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        ApiError::Internal(cause.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidToken | ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::InactiveAccount | ApiError::NotPermitted => StatusCode::FORBIDDEN,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The underlying cause of a server error.
    pub fn cause(&self) -> Option<&str> {
        match self {
            ApiError::Internal(cause) => Some(cause),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status(), Json(json!({ "error": self.to_string() }))).into_response();
        if self == ApiError::InvalidToken {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
