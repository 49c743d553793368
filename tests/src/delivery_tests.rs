//! End-to-end delivery through the router: every gate, the renderer call and
//! the relayed stream.

use crate::utils::*;
use anyhow::Result;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pack_gate::ledger::OrderStatus;
use pack_gate::renderer::HttpWatermarkRenderer;
use pack_gate::Error;
use pack_token::CapabilityCodec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONTENT_URI: &str = "/v1/pack-content?packId=P1&orderId=O1&contentKey=cover.webp";

fn gate() -> (TestGate, Arc<StubRenderer>) {
    let renderer = Arc::new(StubRenderer::image());
    (TestGate::new(test_config(), renderer.clone()), renderer)
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_confirmed_order_streams_watermarked_content() -> Result<()> {
    let (gate, renderer) = gate();

    let response = gate.get(CONTENT_URI, Some(U1_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_eq!(&body_bytes(response).await?[..], b"RIFF....WEBP");

    let calls = renderer.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.content_key, "pack-content/cover.webp");
    assert_eq!(call.pack_id, "P1");
    assert_eq!(call.order_id, "O1");
    assert_eq!(call.username, "alice");

    // Capability is bound to the verified identity and the normalized key.
    let codec = CapabilityCodec::new(CAPABILITY_SECRET.as_bytes())?;
    let claim = codec.verify(&call.token, NOW_SECS)?;
    assert_eq!(claim.user_id, "U1");
    assert_eq!(claim.content_key, "pack-content/cover.webp");
    assert_eq!(claim.vendor_id.as_deref(), Some("v1"));
    assert_eq!(claim.expires_at, NOW_SECS + 120);
    Ok(())
}

#[tokio::test]
async fn test_prefixed_key_is_not_prefixed_twice() -> Result<()> {
    let (gate, renderer) = gate();
    let response = gate
        .get(
            "/v1/pack-content?packId=P1&orderId=O1&contentKey=pack-content/cover.webp",
            Some(U1_TOKEN),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(renderer.calls()[0].content_key, "pack-content/cover.webp");
    Ok(())
}

#[tokio::test]
async fn test_capability_payload_uses_closed_schema() -> Result<()> {
    let (gate, renderer) = gate();
    gate.get(CONTENT_URI, Some(U1_TOKEN)).await;

    let token = &renderer.calls()[0].token;
    let payload = token.split('.').nth(1).expect("three segments");
    let claims: serde_json::Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
    let mut keys: Vec<&str> = claims
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        [
            "contentKey",
            "exp",
            "iat",
            "orderId",
            "packId",
            "userId",
            "username",
            "vendorId",
            "vendorUsername"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_requested_username_is_watermarked() -> Result<()> {
    let (gate, renderer) = gate();
    let response = gate
        .get(&format!("{CONTENT_URI}&username=Alice%20B"), Some(U1_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let call = &renderer.calls()[0];
    assert_eq!(call.username, "Alice B");

    let claim = CapabilityCodec::new(CAPABILITY_SECRET.as_bytes())?.verify(&call.token, NOW_SECS)?;
    assert_eq!(claim.username, "Alice B");
    assert_eq!(claim.user_id, "U1");
    Ok(())
}

#[tokio::test]
async fn test_request_id_is_propagated() -> Result<()> {
    let (gate, renderer) = gate();
    let request = Request::builder()
        .uri(CONTENT_URI)
        .header(header::AUTHORIZATION, format!("Bearer {U1_TOKEN}"))
        .header("x-request-id", "req-abc")
        .body(Body::empty())?;
    let response = gate.send(request).await;
    assert_eq!(response.headers()["x-request-id"], "req-abc");
    assert_eq!(renderer.calls()[0].request_id.as_deref(), Some("req-abc"));

    let generated = gate.get("/health", None).await;
    let id = generated.headers()["x-request-id"].to_str()?;
    assert!(id.starts_with("pg-"));
    Ok(())
}

// ── Gates ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_or_invalid_credential_is_401() -> Result<()> {
    let (gate, renderer) = gate();
    assert_error(
        gate.get(CONTENT_URI, None).await,
        StatusCode::UNAUTHORIZED,
        "missing_credential",
    )
    .await?;
    assert_error(
        gate.get(CONTENT_URI, Some("forged")).await,
        StatusCode::UNAUTHORIZED,
        "invalid_credential",
    )
    .await?;
    assert!(renderer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unauthenticated_before_missing_fields() -> Result<()> {
    let (gate, _renderer) = gate();
    assert_error(
        gate.get("/v1/pack-content", None).await,
        StatusCode::UNAUTHORIZED,
        "missing_credential",
    )
    .await
}

#[tokio::test]
async fn test_repeated_query_field_is_authenticated_then_400() -> Result<()> {
    let (gate, renderer) = gate();
    let uri = "/v1/pack-content?packId=a&packId=b&orderId=O1&contentKey=x.png";
    assert_error(gate.get(uri, None).await, StatusCode::UNAUTHORIZED, "missing_credential").await?;
    assert_error(
        gate.get(uri, Some("not-a-real-token")).await,
        StatusCode::UNAUTHORIZED,
        "invalid_credential",
    )
    .await?;

    let response = gate.get(uri, Some(U1_TOKEN)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert_eq!(body["error"], "missing_field");
    let message = body["message"].as_str().unwrap_or_default();
    assert!(!message.contains("duplicate"), "deserializer detail leaked: {message}");
    assert!(!message.contains("Failed to deserialize"), "{message}");
    assert!(renderer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_fields_are_400() -> Result<()> {
    let (gate, renderer) = gate();
    for uri in [
        "/v1/pack-content?orderId=O1&contentKey=a.png",
        "/v1/pack-content?packId=P1&contentKey=a.png",
        "/v1/pack-content?packId=P1&orderId=O1",
        "/v1/pack-content?packId=&orderId=O1&contentKey=a.png",
    ] {
        assert_error(
            gate.get(uri, Some(U1_TOKEN)).await,
            StatusCode::BAD_REQUEST,
            "missing_field",
        )
        .await?;
    }
    assert!(renderer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_no_purchase_is_403() -> Result<()> {
    let (gate, renderer) = gate();
    // U2 owns nothing.
    assert_error(
        gate.get(CONTENT_URI, Some(U2_TOKEN)).await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await?;
    // U1 owns O1 for P1 only.
    assert_error(
        gate.get(
            "/v1/pack-content?packId=P2&orderId=O1&contentKey=a.png",
            Some(U1_TOKEN),
        )
        .await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await?;
    assert!(renderer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_new_purchase_is_honoured_immediately() -> Result<()> {
    let (gate, _renderer) = gate();
    let uri = "/v1/pack-content?packId=P1&orderId=O2&contentKey=cover.webp";
    assert_error(
        gate.get(uri, Some(U2_TOKEN)).await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await?;

    gate.ledger.upsert(order("O2", "U2", "P1", OrderStatus::Confirmed));
    assert_eq!(gate.get(uri, Some(U2_TOKEN)).await.status(), StatusCode::OK);

    // Replacing the record takes effect on the next request.
    gate.ledger.upsert(order("O2", "U2", "P1", OrderStatus::Refunded));
    assert_error(
        gate.get(uri, Some(U2_TOKEN)).await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await
}

#[tokio::test]
async fn test_pending_and_cancelled_orders_are_403() -> Result<()> {
    let (gate, _renderer) = gate();
    for status in [OrderStatus::Pending, OrderStatus::Cancelled, OrderStatus::Disputed] {
        gate.ledger.set_status("O1", status);
        assert_error(
            gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
            StatusCode::FORBIDDEN,
            "no_valid_order",
        )
        .await?;
    }
    gate.ledger.set_status("O1", OrderStatus::AutoReleased);
    assert_eq!(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn test_stale_purchase_is_403() -> Result<()> {
    let (gate, _renderer) = gate();
    gate.clock.advance(Duration::from_secs(91 * 86_400));
    assert_error(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
        StatusCode::FORBIDDEN,
        "access_expired",
    )
    .await
}

#[tokio::test]
async fn test_rate_limit_is_429_with_retry_after() -> Result<()> {
    let mut config = test_config();
    config.rate_limit.per_minute = 2;
    let renderer = Arc::new(StubRenderer::image());
    let gate = TestGate::new(config, renderer.clone());

    for _ in 0..2 {
        assert_eq!(
            gate.get(CONTENT_URI, Some(U1_TOKEN)).await.status(),
            StatusCode::OK
        );
    }
    let response = gate.get(CONTENT_URI, Some(U1_TOKEN)).await;
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "rate_limit_minute").await?;
    assert_eq!(renderer.calls().len(), 2);

    gate.clock.advance(Duration::from_secs(61));
    assert_eq!(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_content_key_and_watermark_are_400() -> Result<()> {
    let (gate, renderer) = gate();
    assert_error(
        gate.get(
            "/v1/pack-content?packId=P1&orderId=O1&contentKey=../secrets.png",
            Some(U1_TOKEN),
        )
        .await,
        StatusCode::BAD_REQUEST,
        "invalid_content_key",
    )
    .await?;

    let long = "x".repeat(65);
    assert_error(
        gate.get(&format!("{CONTENT_URI}&username={long}"), Some(U1_TOKEN))
            .await,
        StatusCode::BAD_REQUEST,
        "invalid_watermark",
    )
    .await?;
    assert!(renderer.calls().is_empty());
    Ok(())
}

// ── Renderer failures ───────────────────────────────────────────────

#[tokio::test]
async fn test_renderer_failure_fails_closed() -> Result<()> {
    let (gate, renderer) = gate();
    renderer.set_reply(StubReply::Fail(Error::upstream(
        "renderer_unavailable",
        "status 500",
    )));
    let response = gate.get(CONTENT_URI, Some(U1_TOKEN)).await;
    assert_ne!(response.headers()[header::CONTENT_TYPE], "image/webp");
    assert_error(response, StatusCode::BAD_GATEWAY, "renderer_unavailable").await?;

    renderer.set_reply(StubReply::Fail(Error::ContentRejected(StatusCode::NOT_FOUND)));
    assert_error(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
        StatusCode::NOT_FOUND,
        "content_rejected",
    )
    .await
}

// ── Relay headers ───────────────────────────────────────────────────

#[tokio::test]
async fn test_relay_headers_by_media_class() -> Result<()> {
    let (gate, renderer) = gate();

    let image = gate.get(CONTENT_URI, Some(U1_TOKEN)).await;
    assert_eq!(
        image.headers()[header::CACHE_CONTROL],
        "private, no-cache, no-store, must-revalidate, max-age=0"
    );
    assert_eq!(image.headers()[header::PRAGMA], "no-cache");
    assert_eq!(image.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert!(!image.headers().contains_key(header::ACCEPT_RANGES));

    renderer.set_reply(StubReply::Media {
        content_type: "audio/mpeg",
        chunks: vec![&b"ID3"[..]],
    });
    let audio = gate.get(CONTENT_URI, Some(U1_TOKEN)).await;
    assert_eq!(audio.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(audio.headers()[header::CONTENT_DISPOSITION], "inline");
    assert!(audio.headers()[header::CACHE_CONTROL]
        .to_str()?
        .contains("no-store"));
    Ok(())
}

// ── Against a real HTTP renderer ────────────────────────────────────

type Captured = Arc<Mutex<Option<(HashMap<String, String>, HeaderMap)>>>;

async fn spawn_capturing_renderer(captured: Captured) -> Result<String> {
    let app = Router::new().route(
        "/render",
        get(
            move |Query(query): Query<HashMap<String, String>>, headers: HeaderMap| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = Some((query, headers));
                    (
                        [(header::CONTENT_TYPE, "video/mp4")],
                        bytes::Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"),
                    )
                }
            },
        ),
    );
    spawn_server(app).await
}

#[tokio::test]
async fn test_http_renderer_receives_query_and_service_token() -> Result<()> {
    let captured: Captured = Arc::default();
    let base = spawn_capturing_renderer(captured.clone()).await?;
    let renderer = Arc::new(HttpWatermarkRenderer::new(
        &format!("{base}/render"),
        Duration::from_secs(5),
        Duration::from_secs(5),
    )?);
    let gate = TestGate::new(test_config(), renderer);

    let request = Request::builder()
        .uri("/v1/pack-content?packId=P1&orderId=O1&contentKey=clips/intro.mp4")
        .header(header::AUTHORIZATION, format!("Bearer {U1_TOKEN}"))
        .header("x-request-id", "req-video")
        .body(Body::empty())?;
    let response = gate.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(&body_bytes(response).await?[..], b"\x00\x00\x00\x18ftypmp42");

    let (query, headers) = captured.lock().unwrap().take().expect("renderer called");
    assert_eq!(query["packId"], "P1");
    assert_eq!(query["orderId"], "O1");
    assert_eq!(query["contentKey"], "pack-content/clips/intro.mp4");
    assert_eq!(query["username"], "alice");
    assert_eq!(
        headers["x-service-authorization"],
        format!("Bearer {}", query["token"]).as_str()
    );
    assert_eq!(headers["x-request-id"], "req-video");
    Ok(())
}

#[tokio::test]
async fn test_http_renderer_status_is_mapped() -> Result<()> {
    let app = Router::new()
        .route("/gone", get(|| async { StatusCode::GONE }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let base = spawn_server(app).await?;

    for (path, status, reason) in [
        ("gone", StatusCode::GONE, "content_rejected"),
        ("broken", StatusCode::BAD_GATEWAY, "renderer_unavailable"),
    ] {
        let renderer = Arc::new(HttpWatermarkRenderer::new(
            &format!("{base}/{path}"),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )?);
        let gate = TestGate::new(test_config(), renderer);
        assert_error(gate.get(CONTENT_URI, Some(U1_TOKEN)).await, status, reason).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_renderer_timeout_is_504_and_still_counts() -> Result<()> {
    let app = Router::new().route(
        "/render",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let base = spawn_server(app).await?;
    let renderer = Arc::new(HttpWatermarkRenderer::new(
        &format!("{base}/render"),
        Duration::from_millis(200),
        Duration::from_secs(5),
    )?);
    let mut config = test_config();
    config.rate_limit.per_minute = 1;
    let gate = TestGate::new(config, renderer);

    assert_error(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
        StatusCode::GATEWAY_TIMEOUT,
        "renderer_timeout",
    )
    .await?;
    // The timed-out attempt consumed the only admission this minute.
    assert_error(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limit_minute",
    )
    .await
}

#[tokio::test]
async fn test_unreachable_renderer_is_502() -> Result<()> {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let renderer = Arc::new(HttpWatermarkRenderer::new(
        &format!("http://{addr}/render"),
        Duration::from_secs(2),
        Duration::from_secs(2),
    )?);
    let gate = TestGate::new(test_config(), renderer);
    assert_error(
        gate.get(CONTENT_URI, Some(U1_TOKEN)).await,
        StatusCode::BAD_GATEWAY,
        "renderer_unavailable",
    )
    .await
}
