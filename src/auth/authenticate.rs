//! Authentication middleware.
//!
//! Resolves the `Authorization: Bearer <token>` header into a
//! [`RequestIdentity`]. A request without the header, or with an empty
//! one, proceeds as `Anonymous`; this stage never decides whether a route needs a user.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::identity::{IdentityExt, RequestIdentity};
use crate::auth::store::{lookup_with_deadline, StoreError, SCOPE_AUTHENTICATION};
use crate::http::errors::ApiError;
use crate::http::server::AppState;

/// Split `Bearer <token>` into the token. Any other shape is rejected.
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

pub async fn authenticate(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = resolve(&state, request, next).await;
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

async fn resolve(state: &AppState, mut request: Request<Body>, next: Next) -> Response {
    let identity = match request.headers().get(header::AUTHORIZATION) {
        None => RequestIdentity::Anonymous,
        Some(value) if value.is_empty() => RequestIdentity::Anonymous,
        Some(value) => {
            let Some(token) = value.to_str().ok().and_then(bearer_token) else {
                return ApiError::InvalidToken.into_response();
            };
            if !state.users.validate_token_format(token) {
                return ApiError::InvalidToken.into_response();
            }

            let lookup = state.users.get_for_token(SCOPE_AUTHENTICATION, token);
            match lookup_with_deadline(state.config.auth.lookup_timeout(), lookup).await {
                Ok(user) => RequestIdentity::User(user),
                Err(StoreError::RecordNotFound) => {
                    return ApiError::InvalidToken.into_response();
                }
                Err(err) => {
                    return state.error_response(
                        request.method(),
                        request.uri(),
                        ApiError::internal(err),
                    );
                }
            }
        }
    };

    if let Err(err) = request.set_identity(identity) {
        return state.error_response(request.method(), request.uri(), ApiError::internal(err));
    }

    next.run(request).await
}
