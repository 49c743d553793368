//! Bearer credential verification against the identity provider.

use crate::config::IdentityConfig;
use crate::Error;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

mod jwks;

pub use jwks::JwksIdentityProvider;

/// Verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
        }
    }

    /// Default watermark label: display name, e-mail local part, or a short id.
    pub fn derived_username(&self) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|l| !l.is_empty())
        {
            return local.to_string();
        }
        let short: String = self.id.chars().take(8).collect();
        format!("user-{short}")
    }
}

/// Identity provider seam.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Unauthenticated("invalid_credential")` for any credential it cannot validate.
    async fn verify(&self, credential: &str) -> Result<Identity, Error>;

    /// Prime any key cache before serving.
    async fn warm(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_from_headers(headers: &HeaderMap) -> Result<&str, Error> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(Error::Unauthenticated("missing_credential"))?
        .to_str()
        .map_err(|_| Error::Unauthenticated("missing_credential"))?;
    let (scheme, token) = value
        .split_once(' ')
        .ok_or(Error::Unauthenticated("missing_credential"))?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(Error::Unauthenticated("missing_credential"));
    }
    Ok(token)
}

/// Stateless verifier in front of an [`IdentityProvider`].
#[derive(Clone)]
pub struct CredentialVerifier {
    provider: Arc<dyn IdentityProvider>,
}

impl CredentialVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn verify(&self, credential: &str) -> Result<Identity, Error> {
        self.provider.verify(credential).await
    }

    pub async fn verify_headers(&self, headers: &HeaderMap) -> Result<Identity, Error> {
        let credential = bearer_from_headers(headers)?;
        self.verify(credential).await
    }

    pub async fn warm(&self) -> Result<(), Error> {
        self.provider.warm().await
    }
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Algorithm named by `identity.algorithm`.
fn configured_algorithm(config: &IdentityConfig) -> Result<Algorithm, Error> {
    match config.algorithm.to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "RS256" => Ok(Algorithm::RS256),
        other => Err(Error::Config(format!(
            "unsupported identity algorithm: {other}"
        ))),
    }
}

/// Validation pinned to one algorithm, with the configured issuer, audience and leeway.
fn validation_for(algorithm: Algorithm, config: &IdentityConfig) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.algorithms = vec![algorithm];
    validation.leeway = config.leeway_secs;
    if config.issuer.is_empty() {
        validation.iss = None;
    } else {
        validation.set_issuer(&[config.issuer.as_str()]);
    }
    if config.audience.is_empty() {
        validation.validate_aud = false;
    } else {
        validation.set_audience(&[config.audience.as_str()]);
    }
    validation
}

fn decode_identity(
    credential: &str,
    key: &DecodingKey,
    validation: &Validation,
) -> Result<Identity, Error> {
    let data = decode::<IdTokenClaims>(credential, key, validation).map_err(|e| {
        debug!(error = %e, "Identity token rejected");
        Error::Unauthenticated("invalid_credential")
    })?;
    let claims = data.claims;
    if claims.sub.is_empty() {
        return Err(Error::Unauthenticated("invalid_credential"));
    }
    Ok(Identity {
        id: claims.sub,
        email: claims.email,
        display_name: claims.name,
    })
}

/// Verifies identity-provider ID tokens (JWT) with a pinned algorithm and a static key.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn from_config(config: &IdentityConfig) -> Result<Self, Error> {
        let algorithm = configured_algorithm(config)?;
        let key = match algorithm {
            Algorithm::HS256 => {
                if config.hs256_secret.is_empty() {
                    return Err(Error::Config("identity.hs256_secret is required for HS256".into()));
                }
                DecodingKey::from_secret(config.hs256_secret.expose().as_bytes())
            }
            _ => {
                if config.rs256_public_key_pem.is_empty() {
                    return Err(Error::Config(
                        "identity.rs256_public_key_pem is required for RS256".into(),
                    ));
                }
                DecodingKey::from_rsa_pem(config.rs256_public_key_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("invalid identity RSA key: {e}")))?
            }
        };

        Ok(Self {
            key,
            validation: validation_for(algorithm, config),
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<Identity, Error> {
        decode_identity(credential, &self.key, &self.validation)
    }
}

/// Fixed credential → identity table (tests and local development).
#[derive(Default)]
pub struct StaticIdentityProvider {
    identities: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential: impl Into<String>, identity: Identity) -> Self {
        self.identities.insert(credential.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, credential: &str) -> Result<Identity, Error> {
        self.identities
            .get(credential)
            .cloned()
            .ok_or(Error::Unauthenticated("invalid_credential"))
    }
}
