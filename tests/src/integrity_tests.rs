//! Integrity token issuance and partner-side verification.

use crate::utils::*;
use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use pack_gate::config::Secret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SERVICE_KEY: &str = "partner-key-0001";

fn gate() -> TestGate {
    let mut config = test_config();
    config.service_api_key = Secret::new(SERVICE_KEY);
    TestGate::new(config, Arc::new(StubRenderer::image()))
}

fn verify_uri(user: &str, pack: &str, order: &str, expires: u64, token: &str) -> String {
    format!(
        "/v1/integrity-token/verify?userId={user}&packId={pack}&orderId={order}&expires={expires}&token={token}"
    )
}

async fn verify(gate: &TestGate, uri: &str) -> Result<bool> {
    let request = Request::builder()
        .uri(uri)
        .header("x-api-key", SERVICE_KEY)
        .body(Body::empty())?;
    let response = gate.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(body_json(response).await?["valid"].as_bool().unwrap_or_default())
}

async fn issue(gate: &TestGate) -> Result<(String, u64)> {
    let response = gate
        .post_json("/v1/integrity-token", Some(U1_TOKEN), json!({ "packId": "P1" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["orderId"], "O1");
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);
    Ok((token, body["expiresAt"].as_u64().unwrap()))
}

#[tokio::test]
async fn test_issued_token_verifies() -> Result<()> {
    let gate = gate();
    let (token, expires) = issue(&gate).await?;
    assert_eq!(expires, NOW_SECS + 300);
    assert!(verify(&gate, &verify_uri("U1", "P1", "O1", expires, &token)).await?);
    Ok(())
}

#[tokio::test]
async fn test_tampered_inputs_fail() -> Result<()> {
    let gate = gate();
    let (token, expires) = issue(&gate).await?;

    let mut flipped = token.clone().into_bytes();
    flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
    let flipped = String::from_utf8(flipped)?;

    for uri in [
        verify_uri("U2", "P1", "O1", expires, &token),
        verify_uri("U1", "P2", "O1", expires, &token),
        verify_uri("U1", "P1", "O2", expires, &token),
        verify_uri("U1", "P1", "O1", expires + 60, &token),
        verify_uri("U1", "P1", "O1", expires, &flipped),
        verify_uri("U1", "P1", "O1", expires, "not-hex"),
    ] {
        assert!(!verify(&gate, &uri).await?, "accepted {uri}");
    }
    Ok(())
}

#[tokio::test]
async fn test_token_expires() -> Result<()> {
    let gate = gate();
    let (token, expires) = issue(&gate).await?;
    gate.clock.advance(Duration::from_secs(301));
    assert!(!verify(&gate, &verify_uri("U1", "P1", "O1", expires, &token)).await?);
    Ok(())
}

#[tokio::test]
async fn test_verify_requires_service_key() -> Result<()> {
    let gate = gate();
    let (token, expires) = issue(&gate).await?;
    let uri = verify_uri("U1", "P1", "O1", expires, &token);

    assert_error(gate.get(&uri, None).await, StatusCode::UNAUTHORIZED, "invalid_service_key")
        .await?;
    assert_error(
        gate.get(&uri, Some("wrong-key-000000")).await,
        StatusCode::UNAUTHORIZED,
        "invalid_service_key",
    )
    .await?;

    // Bearer form is accepted too.
    let response = gate.get(&uri, Some(SERVICE_KEY)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["valid"], true);
    Ok(())
}

#[tokio::test]
async fn test_issue_requires_purchase() -> Result<()> {
    let gate = gate();
    assert_error(
        gate.post_json("/v1/integrity-token", Some(U2_TOKEN), json!({ "packId": "P1" }))
            .await,
        StatusCode::FORBIDDEN,
        "no_valid_order",
    )
    .await?;
    assert_error(
        gate.post_json("/v1/integrity-token", Some(U1_TOKEN), json!({ "packId": " " }))
            .await,
        StatusCode::BAD_REQUEST,
        "missing_field",
    )
    .await?;
    assert_error(
        gate.post_json("/v1/integrity-token", None, json!({ "packId": "P1" }))
            .await,
        StatusCode::UNAUTHORIZED,
        "missing_credential",
    )
    .await
}
