//! Gate configuration.
//!
//! Loaded from an optional `pack-gate.toml` and `PACK_GATE_*` environment
//! variables (nested sections use `__`, e.g. `PACK_GATE_RATE_LIMIT__PER_MINUTE`).

use serde::Deserialize;

/// String that never prints its value.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            write!(f, "Secret(<unset>)")
        } else {
            write!(f, "Secret(***)")
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    /// Watermark renderer endpoint (full URL, query appended per request).
    #[serde(default = "defaults::renderer_url")]
    pub renderer_url: String,

    /// Bound on waiting for renderer response headers.
    #[serde(default = "defaults::renderer_timeout_secs")]
    pub renderer_timeout_secs: u64,

    /// Bound on each body read while relaying.
    #[serde(default = "defaults::renderer_read_timeout_secs")]
    pub renderer_read_timeout_secs: u64,

    /// Storage prefix for watermarked pack content.
    #[serde(default = "defaults::content_prefix")]
    pub content_prefix: String,

    /// Prefixes eligible for direct pre-signed URLs (no watermark).
    #[serde(default = "defaults::public_prefixes")]
    pub public_prefixes: Vec<String>,

    /// HS256 secret for renderer capability tokens. Empty = generated (dev).
    #[serde(default)]
    pub capability_secret: Secret,

    #[serde(default = "defaults::capability_ttl_secs")]
    pub capability_ttl_secs: u64,

    /// HMAC secret for integrity tokens. Empty = generated (dev).
    #[serde(default)]
    pub integrity_secret: Secret,

    #[serde(default = "defaults::integrity_ttl_secs")]
    pub integrity_ttl_secs: u64,

    /// Default and maximum lifetime of pre-signed URLs.
    #[serde(default = "defaults::presign_ttl_secs")]
    pub presign_ttl_secs: u64,

    /// Access cutoff after purchase. 0 disables the staleness check.
    #[serde(default = "defaults::max_access_age_days")]
    pub max_access_age_days: u64,

    /// Key for partner endpoints (integrity verification). Empty = open (dev).
    #[serde(default)]
    pub service_api_key: Secret,

    /// Allowed browser origins. Empty = no CORS layer.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: defaults::bind_address(),
            renderer_url: defaults::renderer_url(),
            renderer_timeout_secs: defaults::renderer_timeout_secs(),
            renderer_read_timeout_secs: defaults::renderer_read_timeout_secs(),
            content_prefix: defaults::content_prefix(),
            public_prefixes: defaults::public_prefixes(),
            capability_secret: Secret::default(),
            capability_ttl_secs: defaults::capability_ttl_secs(),
            integrity_secret: Secret::default(),
            integrity_ttl_secs: defaults::integrity_ttl_secs(),
            presign_ttl_secs: defaults::presign_ttl_secs(),
            max_access_age_days: defaults::max_access_age_days(),
            service_api_key: Secret::default(),
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            identity: IdentityConfig::default(),
            ledger: LedgerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Per-(identity, pack) sliding-window admission limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::per_minute")]
    pub per_minute: u32,
    #[serde(default = "defaults::per_hour")]
    pub per_hour: u32,
    /// Keys idle this long are swept. Never below one hour.
    #[serde(default = "defaults::idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "defaults::sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: defaults::per_minute(),
            per_hour: defaults::per_hour(),
            idle_ttl_secs: defaults::idle_ttl_secs(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
        }
    }
}

/// Bearer credential verification (identity provider ID tokens).
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// `HS256` or `RS256`.
    #[serde(default = "defaults::identity_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub hs256_secret: Secret,
    /// PEM-encoded RSA public key for `RS256`.
    #[serde(default)]
    pub rs256_public_key_pem: String,
    /// Required `iss`. Empty = not checked.
    #[serde(default)]
    pub issuer: String,
    /// Required `aud`. Empty = not checked.
    #[serde(default)]
    pub audience: String,
    #[serde(default = "defaults::identity_leeway_secs")]
    pub leeway_secs: u64,
    /// Identity provider JWKS endpoint. When set, keys are fetched by `kid`
    /// instead of using `hs256_secret` / `rs256_public_key_pem`.
    #[serde(default)]
    pub jwks_url: String,
    #[serde(default = "defaults::jwks_ttl_secs")]
    pub jwks_ttl_secs: u64,
    /// Minimum gap between JWKS refetches, failed ones included.
    #[serde(default = "defaults::jwks_min_refresh_secs")]
    pub jwks_min_refresh_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            algorithm: defaults::identity_algorithm(),
            hs256_secret: Secret::default(),
            rs256_public_key_pem: String::new(),
            issuer: String::new(),
            audience: String::new(),
            leeway_secs: defaults::identity_leeway_secs(),
            jwks_url: String::new(),
            jwks_ttl_secs: defaults::jwks_ttl_secs(),
            jwks_min_refresh_secs: defaults::jwks_min_refresh_secs(),
        }
    }
}

/// Order ledger source: REST endpoint, or a JSON file for local development.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Secret,
    #[serde(default)]
    pub orders_file: String,
    #[serde(default = "defaults::ledger_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: Secret::default(),
            orders_file: String::new(),
            timeout_secs: defaults::ledger_timeout_secs(),
        }
    }
}

/// S3-compatible object store used for pre-signed URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// e.g. `https://<account>.r2.cloudflarestorage.com`. Empty = presign disabled.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "defaults::storage_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: Secret,
    /// `true`: `endpoint/bucket/key`; `false`: `bucket.endpoint/key`.
    #[serde(default = "defaults::path_style")]
    pub path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            region: defaults::storage_region(),
            access_key_id: String::new(),
            secret_access_key: Secret::default(),
            path_style: defaults::path_style(),
        }
    }
}

mod defaults {
    pub fn bind_address() -> String {
        "0.0.0.0:3050".into()
    }

    pub fn renderer_url() -> String {
        "http://127.0.0.1:8088/render".into()
    }

    pub fn renderer_timeout_secs() -> u64 {
        30
    }

    pub fn renderer_read_timeout_secs() -> u64 {
        30
    }

    pub fn content_prefix() -> String {
        "pack-content/".into()
    }

    pub fn public_prefixes() -> Vec<String> {
        vec!["pack-covers/".into(), "public/".into()]
    }

    pub fn capability_ttl_secs() -> u64 {
        120
    }

    pub fn integrity_ttl_secs() -> u64 {
        300
    }

    pub fn presign_ttl_secs() -> u64 {
        3600
    }

    pub fn max_access_age_days() -> u64 {
        90
    }

    pub fn per_minute() -> u32 {
        60
    }

    pub fn per_hour() -> u32 {
        300
    }

    pub fn idle_ttl_secs() -> u64 {
        3600
    }

    pub fn sweep_interval_secs() -> u64 {
        300
    }

    pub fn identity_algorithm() -> String {
        "RS256".into()
    }

    pub fn identity_leeway_secs() -> u64 {
        30
    }

    pub fn jwks_ttl_secs() -> u64 {
        300
    }

    pub fn jwks_min_refresh_secs() -> u64 {
        10
    }

    pub fn ledger_timeout_secs() -> u64 {
        10
    }

    pub fn storage_region() -> String {
        "auto".into()
    }

    pub fn path_style() -> bool {
        true
    }
}
