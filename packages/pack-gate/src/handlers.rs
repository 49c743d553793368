//! HTTP request handlers.

use crate::delivery::{self, DeliveryRequest};
use crate::metrics::METRICS;
use crate::middleware::RequestId;
use crate::presign::{check_presignable, MAX_PRESIGN_SECS};
use crate::response::{
    HealthResponse, IntegrityTokenRequest, IntegrityTokenResponse, PresignRequest,
    PresignResponse, VerifyIntegrityQuery, VerifyResponse,
};
use crate::state::AppState;
use crate::Error;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shortest pre-signed URL lifetime handed out.
const MIN_PRESIGN_SECS: u64 = 60;

/// Readiness probe. Flips to 503 once shutdown starts.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = METRICS.render(state.limiter.key_count());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: if state.ready.load(Ordering::Relaxed) {
            "ok"
        } else {
            "draining"
        },
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
        rate_limit_keys: state.limiter.key_count(),
        presign_enabled: state.presigner.is_some(),
    })
}

/// `GET /v1/pack-content`: watermarked, streamed delivery.
pub async fn pack_content(
    State(state): State<Arc<AppState>>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    query: Result<Query<DeliveryRequest>, QueryRejection>,
) -> Response {
    METRICS.delivery_total.fetch_add(1, Ordering::Relaxed);
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let result = match query {
        Ok(Query(request)) => delivery::deliver(&state, &headers, &request, &req_id.0).await,
        Err(e) => rejected_query(&state, &headers, &e).await,
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            METRICS.record_delivery_error(&e);
            log_failure(&req_id, &e);
            e.into_response()
        }
    }
}

/// An unparseable query is still authenticated first so unauthenticated
/// callers always see 401.
async fn rejected_query(
    state: &AppState,
    headers: &HeaderMap,
    rejection: &QueryRejection,
) -> Result<Response, Error> {
    state.verifier.verify_headers(headers).await?;
    debug!(error = %rejection.body_text(), "Unparseable delivery query");
    Err(Error::invalid(
        "missing_field",
        "packId, orderId and contentKey must each be given once",
    ))
}

/// `POST /v1/presign`: direct storage URL for public, unwatermarked media.
pub async fn presign(
    State(state): State<Arc<AppState>>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<PresignRequest>, JsonRejection>,
) -> Result<Json<PresignResponse>, Error> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let result = presign_inner(&state, &headers, body).await;
    if let Err(e) = &result {
        log_failure(&req_id, e);
    }
    result
}

async fn presign_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Json<PresignRequest>, JsonRejection>,
) -> Result<Json<PresignResponse>, Error> {
    let identity = state.verifier.verify_headers(headers).await?;
    let Json(request) = body.map_err(|e| Error::invalid("invalid_body", e.body_text()))?;

    let presigner = state
        .presigner
        .as_ref()
        .ok_or(Error::Unavailable("presign_disabled"))?;

    if let Some(pack_id) = request.pack_id.as_deref().filter(|p| !p.is_empty()) {
        state
            .access
            .check_access(&identity.id, pack_id, request.order_id.as_deref())
            .await?
            .into_result()?;
    }

    let key = check_presignable(
        &request.key,
        &state.config.content_prefix,
        &state.config.public_prefixes,
    )?;

    let max = state.config.presign_ttl_secs.min(MAX_PRESIGN_SECS);
    let ttl = request
        .ttl_seconds
        .unwrap_or(max)
        .clamp(MIN_PRESIGN_SECS.min(max), max);
    let signed = presigner
        .presign_get(key, Duration::from_secs(ttl), state.clock.now_secs())
        .await?;

    METRICS.presign_total.fetch_add(1, Ordering::Relaxed);
    info!(user_id = %identity.id, key, ttl, "Issued pre-signed URL");
    Ok(Json(PresignResponse {
        url: signed.url,
        expires_at: signed.expires_at,
    }))
}

/// `POST /v1/integrity-token`: short-lived digest a partner can re-derive.
pub async fn issue_integrity_token(
    State(state): State<Arc<AppState>>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<IntegrityTokenRequest>, JsonRejection>,
) -> Result<Json<IntegrityTokenResponse>, Error> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let result = issue_integrity_inner(&state, &headers, body).await;
    if let Err(e) = &result {
        log_failure(&req_id, e);
    }
    result
}

async fn issue_integrity_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Json<IntegrityTokenRequest>, JsonRejection>,
) -> Result<Json<IntegrityTokenResponse>, Error> {
    let identity = state.verifier.verify_headers(headers).await?;
    let Json(request) = body.map_err(|e| Error::invalid("invalid_body", e.body_text()))?;
    if request.pack_id.trim().is_empty() {
        return Err(Error::invalid("missing_field", "packId is required"));
    }

    let order = state
        .access
        .check_access(&identity.id, &request.pack_id, request.order_id.as_deref())
        .await?
        .into_result()?;

    let token = state.integrity.issue(
        &identity.id,
        &request.pack_id,
        &order.order_id,
        state.clock.now_secs(),
    );
    METRICS.integrity_issued.fetch_add(1, Ordering::Relaxed);
    Ok(Json(IntegrityTokenResponse {
        token: token.digest,
        expires_at: token.expires_at,
        order_id: order.order_id,
    }))
}

/// `GET /v1/integrity-token/verify`: partner-side check (service key required).
pub async fn verify_integrity_token(
    State(state): State<Arc<AppState>>,
    query: Result<Query<VerifyIntegrityQuery>, QueryRejection>,
) -> Result<Json<VerifyResponse>, Error> {
    let Query(q) = query.map_err(|e| {
        debug!(error = %e.body_text(), "Unparseable verify query");
        Error::invalid(
            "missing_field",
            "userId, packId, orderId, expires and token are required",
        )
    })?;
    let valid = state.integrity.verify(
        &q.token,
        &q.user_id,
        &q.pack_id,
        &q.order_id,
        q.expires,
        state.clock.now_secs(),
    );
    if valid {
        METRICS.integrity_verify_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        METRICS.integrity_verify_failed.fetch_add(1, Ordering::Relaxed);
    }
    Ok(Json(VerifyResponse { valid }))
}

/// Denials are routine; upstream and internal failures are not.
fn log_failure(req_id: &RequestId, err: &Error) {
    match err {
        Error::Internal(_) | Error::Config(_) => {
            error!(req_id = %req_id.0, error = %err, "Request failed");
        }
        Error::Upstream { .. } | Error::GatewayTimeout(_) | Error::ContentRejected(_) => {
            warn!(req_id = %req_id.0, error = %err, "Upstream failure");
        }
        _ => {
            info!(req_id = %req_id.0, reason = err.reason(), "Request denied");
        }
    }
}
