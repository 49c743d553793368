//! Error types for the gate.
//!
//! Every variant carries a stable machine-readable reason. `Display` may include
//! internal detail for logs; the HTTP body never does.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Start-up configuration error.
    Config(String),
    /// Missing or invalid bearer credential.
    Unauthenticated(&'static str),
    /// Valid identity without access to the resource.
    Forbidden(&'static str),
    /// Admission denied by the rate limiter.
    RateLimited {
        reason: &'static str,
        retry_after_secs: u64,
    },
    /// Missing or malformed request field.
    InvalidRequest {
        reason: &'static str,
        detail: String,
    },
    /// Identity provider, ledger, or renderer unreachable or erroring.
    Upstream {
        reason: &'static str,
        detail: String,
    },
    /// Upstream did not answer in time.
    GatewayTimeout(&'static str),
    /// Renderer refused the input (bad or unknown content key).
    ContentRejected(StatusCode),
    /// Feature not configured on this instance.
    Unavailable(&'static str),
    /// Unexpected fault.
    Internal(String),
}

impl Error {
    pub fn invalid(reason: &'static str, detail: impl Into<String>) -> Self {
        Error::InvalidRequest {
            reason,
            detail: detail.into(),
        }
    }

    pub fn upstream(reason: &'static str, detail: impl Into<String>) -> Self {
        Error::Upstream {
            reason,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ContentRejected(status) => *status,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable reason code returned as `error` in the JSON body.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::Internal(_) => "internal_error",
            Error::Unauthenticated(reason)
            | Error::Forbidden(reason)
            | Error::GatewayTimeout(reason)
            | Error::Unavailable(reason) => reason,
            Error::RateLimited { reason, .. }
            | Error::InvalidRequest { reason, .. }
            | Error::Upstream { reason, .. } => reason,
            Error::ContentRejected(_) => "content_rejected",
        }
    }

    /// Caller-safe message.
    fn public_message(&self) -> String {
        match self {
            Error::Config(_) | Error::Internal(_) => "Internal error".into(),
            Error::Unauthenticated(_) => "Sign in again".into(),
            Error::Forbidden(_) => "No access to this content".into(),
            Error::RateLimited { .. } => "Too many requests, slow down".into(),
            Error::InvalidRequest { detail, .. } => detail.clone(),
            Error::Upstream { .. } => "Upstream service unavailable".into(),
            Error::GatewayTimeout(_) => "Upstream service timed out".into(),
            Error::ContentRejected(_) => "Content could not be rendered".into(),
            Error::Unavailable(_) => "Not available".into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Unauthenticated(reason) => write!(f, "unauthenticated: {reason}"),
            Error::Forbidden(reason) => write!(f, "forbidden: {reason}"),
            Error::RateLimited {
                reason,
                retry_after_secs,
            } => write!(f, "rate limited: {reason} (retry after {retry_after_secs}s)"),
            Error::InvalidRequest { reason, detail } => {
                write!(f, "invalid request: {reason}: {detail}")
            }
            Error::Upstream { reason, detail } => write!(f, "upstream failure: {reason}: {detail}"),
            Error::GatewayTimeout(reason) => write!(f, "upstream timeout: {reason}"),
            Error::ContentRejected(status) => write!(f, "renderer rejected content: {status}"),
            Error::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<pack_token::TokenError> for Error {
    fn from(e: pack_token::TokenError) -> Self {
        Error::Internal(format!("token: {e}"))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.reason(),
            "message": self.public_message(),
        });
        let mut response = (self.status(), Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Error::RateLimited {
            retry_after_secs, ..
        } = self
        {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
