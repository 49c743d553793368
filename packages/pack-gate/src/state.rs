//! Application state shared across handlers.

use crate::access::OrderAccessValidator;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, Secret};
use crate::content_key::normalize_prefix;
use crate::identity::{
    CredentialVerifier, IdentityProvider, JwksIdentityProvider, JwtIdentityProvider,
};
use crate::ledger::{HttpOrderLedger, InMemoryOrderLedger, OrderLedger};
use crate::presign::{Presigner, S3Presigner, MAX_PRESIGN_SECS};
use crate::rate_limit::{InMemoryWindowStore, RateLimiter, RateLimits, WindowStore};
use crate::renderer::{HttpWatermarkRenderer, WatermarkRenderer};
use pack_token::{CapabilityCodec, IntegrityCodec};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// External collaborators behind their trait seams.
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub ledger: Arc<dyn OrderLedger>,
    pub renderer: Arc<dyn WatermarkRenderer>,
    pub presigner: Option<Arc<dyn Presigner>>,
    pub window_store: Arc<dyn WindowStore>,
    pub clock: Arc<dyn Clock>,
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub verifier: CredentialVerifier,
    pub access: OrderAccessValidator,
    pub limiter: Arc<RateLimiter>,
    pub capability: CapabilityCodec,
    pub integrity: IntegrityCodec,
    pub renderer: Arc<dyn WatermarkRenderer>,
    pub presigner: Option<Arc<dyn Presigner>>,
    pub clock: Arc<dyn Clock>,
    pub start_time: Instant,
    pub request_count: AtomicU64,
    pub ready: AtomicBool,
}

impl AppState {
    /// Production wiring from configuration.
    pub fn new(config: Config) -> Result<Self, crate::Error> {
        let identity: Arc<dyn IdentityProvider> = if config.identity.jwks_url.is_empty() {
            info!(algorithm = %config.identity.algorithm, "Identity tokens checked against a static key");
            Arc::new(JwtIdentityProvider::from_config(&config.identity)?)
        } else {
            info!(
                algorithm = %config.identity.algorithm,
                jwks_url = %config.identity.jwks_url,
                "Identity tokens checked against JWKS"
            );
            Arc::new(JwksIdentityProvider::from_config(&config.identity)?)
        };

        let ledger: Arc<dyn OrderLedger> = if !config.ledger.url.is_empty() {
            info!(url = %config.ledger.url, "Using HTTP order ledger");
            Arc::new(HttpOrderLedger::from_config(&config.ledger)?)
        } else if !config.ledger.orders_file.is_empty() {
            warn!(path = %config.ledger.orders_file, "Using file-backed order ledger (dev)");
            Arc::new(InMemoryOrderLedger::from_json_file(&config.ledger.orders_file)?)
        } else {
            return Err(crate::Error::Config(
                "ledger.url or ledger.orders_file is required".into(),
            ));
        };

        let renderer: Arc<dyn WatermarkRenderer> = Arc::new(HttpWatermarkRenderer::new(
            &config.renderer_url,
            Duration::from_secs(config.renderer_timeout_secs),
            Duration::from_secs(config.renderer_read_timeout_secs),
        )?);

        let presigner: Option<Arc<dyn Presigner>> = match S3Presigner::from_config(&config.storage)? {
            Some(p) => {
                info!(presigner = ?p, "Pre-signed URLs enabled");
                Some(Arc::new(p))
            }
            None => {
                info!("No storage endpoint configured, pre-signed URLs disabled");
                None
            }
        };

        Self::with_collaborators(
            config,
            Collaborators {
                identity,
                ledger,
                renderer,
                presigner,
                window_store: Arc::new(InMemoryWindowStore::new()),
                clock: Arc::new(SystemClock),
            },
        )
    }

    /// Wire the gates around the given collaborators.
    pub fn with_collaborators(
        mut config: Config,
        collaborators: Collaborators,
    ) -> Result<Self, crate::Error> {
        config.content_prefix = normalize_prefix(&config.content_prefix);
        config.public_prefixes = config
            .public_prefixes
            .iter()
            .map(|p| normalize_prefix(p))
            .filter(|p| !p.is_empty())
            .collect();

        let capability_secret = secret_or_generated(&config.capability_secret, "capability_secret");
        let integrity_secret = secret_or_generated(&config.integrity_secret, "integrity_secret");
        let capability = CapabilityCodec::new(capability_secret.as_bytes())?;
        let integrity = IntegrityCodec::new(integrity_secret.as_bytes(), config.integrity_ttl_secs)?;

        if config.presign_ttl_secs > MAX_PRESIGN_SECS {
            warn!(
                configured = config.presign_ttl_secs,
                cap = MAX_PRESIGN_SECS,
                "presign_ttl_secs exceeds the SigV4 limit, pre-signed URLs are capped"
            );
        }

        let max_access_age = (config.max_access_age_days > 0)
            .then(|| Duration::from_secs(config.max_access_age_days * 86_400));
        let access = OrderAccessValidator::new(
            collaborators.ledger,
            max_access_age,
            collaborators.clock.clone(),
        );

        let limiter = Arc::new(RateLimiter::new(
            collaborators.window_store,
            RateLimits {
                per_minute: config.rate_limit.per_minute,
                per_hour: config.rate_limit.per_hour,
            },
            Duration::from_secs(config.rate_limit.idle_ttl_secs),
            collaborators.clock.clone(),
        ));

        info!(
            content_prefix = %config.content_prefix,
            per_minute = config.rate_limit.per_minute,
            per_hour = config.rate_limit.per_hour,
            capability_ttl_secs = config.capability_ttl_secs,
            "Delivery gates configured"
        );

        Ok(Self {
            verifier: CredentialVerifier::new(collaborators.identity),
            access,
            limiter,
            capability,
            integrity,
            renderer: collaborators.renderer,
            presigner: collaborators.presigner,
            clock: collaborators.clock,
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            ready: AtomicBool::new(true),
        })
    }
}

/// Configured secret, or a per-process random one (dev mode).
fn secret_or_generated(secret: &Secret, name: &str) -> String {
    if !secret.is_empty() {
        return secret.expose().to_string();
    }
    warn!(
        secret = name,
        "Secret not configured, generating a per-process value (dev mode only)"
    );
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
