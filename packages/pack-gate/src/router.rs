//! HTTP router setup.

use crate::handlers;
use crate::middleware::{inject_request_id, require_service_key};
use crate::state::AppState;
use crate::Error;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any as AnyHeaders, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Create the application router.
pub fn create(state: Arc<AppState>) -> Router {
    let partner = Router::new()
        .route(
            "/v1/integrity-token/verify",
            get(handlers::verify_integrity_token),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_service_key,
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/pack-content", get(handlers::pack_content))
        .route("/v1/presign", post(handlers::presign))
        .route("/v1/integrity-token", post(handlers::issue_integrity_token))
        .merge(partner)
        .with_state(state.clone())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.config.cors_origins) {
        router = router.layer(cors);
    }

    router
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers(AnyHeaders)
            .expose_headers([axum::http::HeaderName::from_static("x-request-id")]),
    )
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("Handler panicked");
    Error::Internal("handler panicked".into()).into_response()
}
