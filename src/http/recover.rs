//! Panic containment.
//!
//! The outermost stage. A panic anywhere downstream is caught here, logged,
//! and turned into a 500 for that request alone; the connection is closed
//! after the response.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;

use crate::http::errors::ApiError;
use crate::http::server::AppState;

pub async fn recover_panic(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let cause = format!("panic: {}", panic_message(payload.as_ref()));
            let mut response = state.error_response(&method, &uri, ApiError::Internal(cause));
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let formatted: Box<dyn Any + Send> = Box::new(format!("index {} out of range", 3));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(formatted.as_ref()), "index 3 out of range");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
