//! ID-token verification against the identity provider's JWKS.
//!
//! Keys are cached by `kid`. The set is refetched on a `kid` miss or once the
//! TTL lapses, at most once per `min_refresh`, failed fetches included. When a
//! refetch fails the last good key for the `kid` is still served.

use super::{configured_algorithm, decode_identity, validation_for, Identity, IdentityProvider};
use crate::config::IdentityConfig;
use crate::Error;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode_header, DecodingKey, Validation};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CachedJwks {
    keys_by_kid: HashMap<String, DecodingKey>,
    /// Last successful fetch.
    fetched_at: Option<Instant>,
    /// Stamped before each fetch so concurrent misses do not all refetch.
    last_refresh_attempt: Option<Instant>,
}

impl CachedJwks {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|t| t.elapsed() < ttl)
    }
}

/// [`IdentityProvider`] backed by a JWKS endpoint.
pub struct JwksIdentityProvider {
    client: reqwest::Client,
    jwks_url: String,
    validation: Validation,
    cache: RwLock<CachedJwks>,
    ttl: Duration,
    min_refresh: Duration,
}

impl JwksIdentityProvider {
    /// Builds the provider without fetching. Call [`IdentityProvider::warm`] before serving.
    pub fn from_config(config: &IdentityConfig) -> Result<Self, Error> {
        let algorithm = configured_algorithm(config)?;
        url::Url::parse(&config.jwks_url)
            .map_err(|e| Error::Config(format!("invalid identity.jwks_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("JWKS HTTP client build failed: {e}")))?;

        Ok(Self {
            client,
            jwks_url: config.jwks_url.clone(),
            validation: validation_for(algorithm, config),
            cache: RwLock::new(CachedJwks::default()),
            ttl: Duration::from_secs(config.jwks_ttl_secs),
            min_refresh: Duration::from_secs(config.jwks_min_refresh_secs),
        })
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, Error> {
        {
            let cache = self.cache.read();
            if cache.is_fresh(self.ttl) {
                if let Some(key) = cache.keys_by_kid.get(kid) {
                    return Ok(key.clone());
                }
            }
        }
        self.refresh_and_lookup(kid).await
    }

    async fn refresh_and_lookup(&self, kid: &str) -> Result<DecodingKey, Error> {
        {
            let mut cache = self.cache.write();
            let throttled = cache
                .last_refresh_attempt
                .is_some_and(|t| t.elapsed() < self.min_refresh);
            if throttled {
                if let Some(key) = cache.keys_by_kid.get(kid) {
                    return Ok(key.clone());
                }
                if cache.fetched_at.is_none() {
                    return Err(Error::upstream(
                        "identity_unavailable",
                        "JWKS not fetched yet, refresh throttled",
                    ));
                }
                debug!(kid, "Unknown kid, JWKS refresh throttled");
                return Err(Error::Unauthenticated("invalid_credential"));
            }
            cache.last_refresh_attempt = Some(Instant::now());
        }

        match self.refresh().await {
            Ok(_) => self.cache.read().keys_by_kid.get(kid).cloned().ok_or_else(|| {
                debug!(kid, "kid not present in JWKS");
                Error::Unauthenticated("invalid_credential")
            }),
            Err(e) => match self.cache.read().keys_by_kid.get(kid) {
                Some(key) => {
                    warn!(error = %e, kid, "JWKS refresh failed, serving cached key");
                    Ok(key.clone())
                }
                None => {
                    warn!(error = %e, jwks_url = %self.jwks_url, "JWKS refresh failed");
                    Err(e)
                }
            },
        }
    }

    /// Fetch the set and replace the cached keys. Returns the number of usable keys.
    async fn refresh(&self) -> Result<usize, Error> {
        let jwk_set = self.fetch().await?;
        let keys_by_kid = usable_keys(&jwk_set);
        let count = keys_by_kid.len();
        let mut cache = self.cache.write();
        cache.keys_by_kid = keys_by_kid;
        cache.fetched_at = Some(Instant::now());
        Ok(count)
    }

    async fn fetch(&self) -> Result<JwkSet, Error> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| Error::upstream("identity_unavailable", format!("JWKS fetch: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::upstream(
                "identity_unavailable",
                format!("JWKS endpoint returned {}", response.status()),
            ));
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::upstream("identity_unavailable", format!("JWKS body: {e}")))
    }
}

/// Keys without a `kid` cannot be looked up and are skipped.
fn usable_keys(jwk_set: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut keys_by_kid = HashMap::new();
    for jwk in &jwk_set.keys {
        let Some(kid) = &jwk.common.key_id else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys_by_kid.insert(kid.clone(), key);
            }
            Err(e) => debug!(kid = kid.as_str(), error = %e, "Skipping JWK"),
        }
    }
    keys_by_kid
}

#[async_trait]
impl IdentityProvider for JwksIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<Identity, Error> {
        let header = decode_header(credential).map_err(|e| {
            debug!(error = %e, "Malformed identity token header");
            Error::Unauthenticated("invalid_credential")
        })?;
        if !self.validation.algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "Identity token algorithm not accepted");
            return Err(Error::Unauthenticated("invalid_credential"));
        }
        let kid = header
            .kid
            .ok_or(Error::Unauthenticated("invalid_credential"))?;
        let key = self.key_for(&kid).await?;
        decode_identity(credential, &key, &self.validation)
    }

    async fn warm(&self) -> Result<(), Error> {
        self.cache.write().last_refresh_attempt = Some(Instant::now());
        let kid_count = self.refresh().await?;
        info!(jwks_url = %self.jwks_url, kid_count, "JWKS cached");
        Ok(())
    }
}

impl std::fmt::Debug for JwksIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksIdentityProvider")
            .field("jwks_url", &self.jwks_url)
            .field("cached_keys", &self.cache.read().keys_by_kid.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
