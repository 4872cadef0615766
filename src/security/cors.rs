//! CORS middleware.
//!
//! Only origins listed in `cors.trusted_origins` get an
//! `Access-Control-Allow-Origin` echo. Preflight requests from a trusted
//! origin are answered here with 200 and never reach the inner stages.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::server::AppState;

const ALLOWED_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";
const ALLOWED_HEADERS: &str = "Authorization, Content-Type";

pub async fn enable_cors(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .filter(|value| !value.is_empty())
        .filter(|value| {
            state
                .config
                .cors
                .trusted_origins
                .iter()
                .any(|trusted| value.as_bytes() == trusted.as_bytes())
        })
        .cloned();

    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = match &origin {
        Some(_) if is_preflight => {
            let mut response = StatusCode::OK.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOWED_HEADERS),
            );
            response
        }
        _ => next.run(request).await,
    };

    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Method"),
    );
    if let Some(origin) = origin {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }

    response
}
