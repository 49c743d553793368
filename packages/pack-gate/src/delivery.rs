//! Watermarked delivery: authenticate, authorize, admit, render, relay.
//!
//! Each gate is terminal on failure. The rate-limit admission happens before
//! any renderer I/O and is kept even if rendering later fails.

use crate::content_key::ContentKey;
use crate::identity::Identity;
use crate::metrics::METRICS;
use crate::renderer::{RenderRequest, RenderedMedia};
use crate::state::AppState;
use crate::Error;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use futures::TryStreamExt;
use pack_token::CapabilityFields;
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{info, warn};

pub const MAX_WATERMARK_CHARS: usize = 64;

const NO_CACHE: &str = "private, no-cache, no-store, must-revalidate, max-age=0";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Query of `GET /v1/pack-content`. Fields are optional so a missing one maps
/// to `missing_field` instead of a framework rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub pack_id: Option<String>,
    pub order_id: Option<String>,
    pub content_key: Option<String>,
    /// Requested watermark label. Defaults to the buyer's derived username.
    pub username: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, Error> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::invalid("missing_field", format!("{name} is required")))
}

/// Watermark label: trimmed request value, else the identity's derived username.
pub fn sanitize_watermark(requested: Option<&str>, identity: &Identity) -> Result<String, Error> {
    let Some(requested) = requested.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(identity
            .derived_username()
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_WATERMARK_CHARS)
            .collect());
    };
    if requested.chars().count() > MAX_WATERMARK_CHARS {
        return Err(Error::invalid(
            "invalid_watermark",
            format!("username must be at most {MAX_WATERMARK_CHARS} characters"),
        ));
    }
    if requested.chars().any(char::is_control) {
        return Err(Error::invalid(
            "invalid_watermark",
            "username contains control characters",
        ));
    }
    Ok(requested.to_string())
}

/// Run one delivery through every gate and return the streaming response.
pub async fn deliver(
    state: &AppState,
    headers: &HeaderMap,
    request: &DeliveryRequest,
    req_id: &str,
) -> Result<Response, Error> {
    let identity = state.verifier.verify_headers(headers).await?;

    let pack_id = required(&request.pack_id, "packId")?;
    let order_id = required(&request.order_id, "orderId")?;
    let raw_key = required(&request.content_key, "contentKey")?;

    let order = state
        .access
        .check_access(&identity.id, pack_id, Some(order_id))
        .await?
        .into_result()?;

    state.limiter.admit(&identity.id, pack_id).into_result()?;

    let content_key = ContentKey::normalize(raw_key, &state.config.content_prefix)?;
    let username = sanitize_watermark(request.username.as_deref(), &identity)?;

    let token = state.capability.issue(
        CapabilityFields {
            user_id: identity.id.clone(),
            username: username.clone(),
            pack_id: pack_id.to_string(),
            order_id: order.order_id.clone(),
            content_key: content_key.as_str().to_string(),
            vendor_id: order.vendor_id.clone(),
            vendor_username: order.vendor_username.clone(),
        },
        state.config.capability_ttl_secs,
        state.clock.now_secs(),
    )?;

    let start = Instant::now();
    let media = state
        .renderer
        .render(RenderRequest {
            pack_id,
            order_id: &order.order_id,
            content_key: content_key.as_str(),
            username: &username,
            token: &token,
            request_id: Some(req_id),
        })
        .await?;
    METRICS.record_delivery_duration(start);

    info!(
        req_id = %req_id,
        user_id = %identity.id,
        pack_id,
        content_key = %content_key,
        content_type = ?media.content_type,
        "Relaying watermarked content"
    );
    relay_response(media)
}

/// Headers for a relayed payload of the given content type.
pub fn relay_headers(content_type: &str) -> Vec<(header::HeaderName, HeaderValue)> {
    let mut headers = vec![
        (header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
        (header::EXPIRES, HeaderValue::from_static("0")),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
    ];
    let media_class = content_type
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if media_class == "video" || media_class == "audio" {
        headers.push((header::ACCEPT_RANGES, HeaderValue::from_static("bytes")));
        headers.push((
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("inline"),
        ));
    }
    headers
}

/// Stream the renderer body to the client. Chunks are pulled on demand; an
/// upstream read error aborts the body instead of ending it cleanly.
pub fn relay_response(media: RenderedMedia) -> Result<Response, Error> {
    let content_type = media
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let class_source = content_type.to_str().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();

    let body = media
        .body
        .inspect_ok(|chunk| {
            METRICS
                .delivery_bytes
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        })
        .inspect_err(|e| {
            METRICS.stream_aborts.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Renderer stream failed mid-relay");
        });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(len) = media.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    for (name, value) in relay_headers(&class_source) {
        builder = builder.header(name, value);
    }

    METRICS.delivery_success.fetch_add(1, Ordering::Relaxed);
    builder
        .body(Body::from_stream(body))
        .map_err(|e| Error::Internal(format!("relay response: {e}")))
}
