//! Request and response bodies for the JSON endpoints.

use serde::{Deserialize, Serialize};

/// Response from the health endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub requests: u64,
    pub rate_limit_keys: usize,
    pub presign_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub key: String,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// When set, ownership of the pack is checked first.
    #[serde(default)]
    pub pack_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub url: String,
    /// Unix seconds.
    pub expires_at: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityTokenRequest {
    pub pack_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityTokenResponse {
    pub token: String,
    pub expires_at: u64,
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyIntegrityQuery {
    pub user_id: String,
    pub pack_id: String,
    pub order_id: String,
    pub expires: u64,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}
