//! Pre-signed URL issuance for public, unwatermarked media.

use crate::utils::*;
use anyhow::Result;
use axum::http::StatusCode;
use pack_gate::ledger::OrderStatus;
use serde_json::json;
use std::sync::Arc;

fn gate() -> TestGate {
    TestGate::with_presigner(test_config(), Arc::new(StubRenderer::image()))
}

#[tokio::test]
async fn test_public_key_is_presigned() -> Result<()> {
    let gate = gate();
    let response = gate
        .post_json(
            "/v1/presign",
            Some(U1_TOKEN),
            json!({ "key": "pack-covers/P1/cover.jpg", "ttlSeconds": 600 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["expiresAt"], NOW_SECS + 600);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("https://storage.example.com/media/pack-covers/P1/cover.jpg?"));
    assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
    assert!(url.contains("X-Amz-Date=20231114T221320Z"));
    assert!(url.contains("X-Amz-Expires=600"));
    assert!(!url.contains("X-Amz-Expires=6000"));
    assert!(url.contains("X-Amz-Signature="));
    Ok(())
}

#[tokio::test]
async fn test_ttl_is_clamped_to_configured_bounds() -> Result<()> {
    let gate = gate();
    let long = body_json(
        gate.post_json(
            "/v1/presign",
            Some(U1_TOKEN),
            json!({ "key": "public/banner.png", "ttlSeconds": 86_400 }),
        )
        .await,
    )
    .await?;
    assert_eq!(long["expiresAt"], NOW_SECS + 3_600);

    let short = body_json(
        gate.post_json(
            "/v1/presign",
            Some(U1_TOKEN),
            json!({ "key": "public/banner.png", "ttlSeconds": 1 }),
        )
        .await,
    )
    .await?;
    assert_eq!(short["expiresAt"], NOW_SECS + 60);

    let default = body_json(
        gate.post_json("/v1/presign", Some(U1_TOKEN), json!({ "key": "public/banner.png" }))
            .await,
    )
    .await?;
    assert_eq!(default["expiresAt"], NOW_SECS + 3_600);
    Ok(())
}

#[tokio::test]
async fn test_expiry_reports_the_seven_day_url_limit() -> Result<()> {
    let mut config = test_config();
    config.presign_ttl_secs = 30 * 86_400;
    let gate = TestGate::with_presigner(config, Arc::new(StubRenderer::image()));

    for request in [
        json!({ "key": "public/banner.png" }),
        json!({ "key": "public/banner.png", "ttlSeconds": 30 * 86_400 }),
    ] {
        let body = body_json(gate.post_json("/v1/presign", Some(U1_TOKEN), request).await).await?;
        assert_eq!(body["expiresAt"], NOW_SECS + 604_800);
        let url = body["url"].as_str().unwrap();
        assert!(url.contains("X-Amz-Expires=604800"), "{url}");
    }
    Ok(())
}

#[tokio::test]
async fn test_watermarked_content_is_never_presigned() -> Result<()> {
    let gate = gate();
    assert_error(
        gate.post_json(
            "/v1/presign",
            Some(U1_TOKEN),
            json!({ "key": "pack-content/cover.webp" }),
        )
        .await,
        StatusCode::FORBIDDEN,
        "watermark_required",
    )
    .await?;
    assert_error(
        gate.post_json("/v1/presign", Some(U1_TOKEN), json!({ "key": "private/keys.txt" }))
            .await,
        StatusCode::BAD_REQUEST,
        "invalid_content_key",
    )
    .await
}

#[tokio::test]
async fn test_ownership_is_checked_when_pack_given() -> Result<()> {
    let gate = gate();
    let request = json!({ "key": "pack-covers/P1/cover.jpg", "packId": "P1" });

    assert_eq!(
        gate.post_json("/v1/presign", Some(U1_TOKEN), request.clone())
            .await
            .status(),
        StatusCode::OK
    );
    assert_error(
        gate.post_json("/v1/presign", Some(U2_TOKEN), request.clone())
            .await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await?;

    gate.ledger.set_status("O1", OrderStatus::Refunded);
    assert_error(
        gate.post_json("/v1/presign", Some(U1_TOKEN), request).await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await
}

#[tokio::test]
async fn test_presign_requires_credential() -> Result<()> {
    let gate = gate();
    assert_error(
        gate.post_json("/v1/presign", None, json!({ "key": "public/banner.png" }))
            .await,
        StatusCode::UNAUTHORIZED,
        "missing_credential",
    )
    .await
}

#[tokio::test]
async fn test_malformed_body_is_400() -> Result<()> {
    let gate = gate();
    assert_error(
        gate.post_json("/v1/presign", Some(U1_TOKEN), json!({ "ttlSeconds": 60 }))
            .await,
        StatusCode::BAD_REQUEST,
        "invalid_body",
    )
    .await
}

#[tokio::test]
async fn test_presign_disabled_without_storage() -> Result<()> {
    let gate = TestGate::new(test_config(), Arc::new(StubRenderer::image()));
    assert_error(
        gate.post_json("/v1/presign", Some(U1_TOKEN), json!({ "key": "public/banner.png" }))
            .await,
        StatusCode::SERVICE_UNAVAILABLE,
        "presign_disabled",
    )
    .await?;

    let health = body_json(gate.get("/health", None).await).await?;
    assert_eq!(health["presign_enabled"], false);
    Ok(())
}
