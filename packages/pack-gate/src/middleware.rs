//! Partner authentication and request correlation middleware.

use crate::state::AppState;
use crate::Error;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Validate `X-Api-Key` or `Authorization: Bearer` against `service_api_key`.
/// Bypassed when no key is configured (dev mode).
pub async fn require_service_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.service_api_key.expose();
    if expected.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        });

    let authorized = matches!(
        provided,
        Some(key) if key.len() == expected.len() && bool::from(key.as_bytes().ct_eq(expected.as_bytes()))
    );
    if authorized {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "Rejected partner call: bad service key");
    Error::Unauthenticated("invalid_service_key").into_response()
}

/// Propagate or generate `x-request-id` for end-to-end correlation.
pub async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            format!("pg-{:016x}", rng.gen::<u64>())
        });

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", val);
    }

    response
}

/// Request correlation ID, extractable from `Request::extensions()`.
#[derive(Clone, Debug, Default)]
pub struct RequestId(pub String);
