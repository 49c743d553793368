//! Watermark renderer client.
//!
//! The renderer fetches the original object, stamps the buyer's label and
//! streams the result. It authorizes each call with the capability token the
//! gate issues, so it never needs to trust the caller directly.

use crate::Error;
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, warn};

const RENDERER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub pack_id: &'a str,
    pub order_id: &'a str,
    pub content_key: &'a str,
    pub username: &'a str,
    /// Capability token authorizing this single render.
    pub token: &'a str,
    pub request_id: Option<&'a str>,
}

/// Watermarked bytes plus the headers needed to relay them.
pub struct RenderedMedia {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, std::io::Error>>,
}

impl std::fmt::Debug for RenderedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedMedia")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WatermarkRenderer: Send + Sync {
    /// Resolves once response headers arrive; the body is read lazily.
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedMedia, Error>;
}

/// Map a non-success renderer status to the caller-facing error.
pub fn map_renderer_status(status: StatusCode) -> Error {
    match status.as_u16() {
        400 | 404 | 410 | 422 => Error::ContentRejected(status),
        504 => Error::GatewayTimeout("renderer_timeout"),
        _ => Error::upstream("renderer_unavailable", format!("renderer status {status}")),
    }
}

pub struct HttpWatermarkRenderer {
    http: reqwest::Client,
    url: url::Url,
    header_timeout: Duration,
}

impl HttpWatermarkRenderer {
    /// `header_timeout` bounds the wait for response headers; `read_timeout`
    /// bounds each body read while relaying.
    pub fn new(url: &str, header_timeout: Duration, read_timeout: Duration) -> Result<Self, Error> {
        let url = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid renderer_url: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(RENDERER_CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| Error::Config(format!("renderer HTTP client build failed: {e}")))?;
        Ok(Self {
            http,
            url,
            header_timeout,
        })
    }
}

#[async_trait]
impl WatermarkRenderer for HttpWatermarkRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedMedia, Error> {
        let mut builder = self
            .http
            .get(self.url.clone())
            .query(&[
                ("packId", request.pack_id),
                ("orderId", request.order_id),
                ("contentKey", request.content_key),
                ("username", request.username),
                ("token", request.token),
            ])
            .header("X-Service-Authorization", format!("Bearer {}", request.token));
        if let Some(request_id) = request.request_id {
            builder = builder.header("X-Request-Id", request_id);
        }

        let response = match tokio::time::timeout(self.header_timeout, builder.send()).await {
            Err(_) => {
                warn!(timeout_secs = self.header_timeout.as_secs(), "Renderer timed out");
                return Err(Error::GatewayTimeout("renderer_timeout"));
            }
            Ok(Err(e)) if e.is_timeout() => {
                warn!(error = %e, "Renderer timed out");
                return Err(Error::GatewayTimeout("renderer_timeout"));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Renderer request failed");
                return Err(Error::upstream("renderer_unavailable", e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, content_key = request.content_key, "Renderer refused");
            return Err(map_renderer_status(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        debug!(?content_type, ?content_length, "Renderer stream opened");

        Ok(RenderedMedia {
            content_type,
            content_length,
            body: response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        })
    }
}
