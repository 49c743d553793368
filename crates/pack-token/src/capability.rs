//! Signed, self-contained capability tokens (HS256 compact JWS).
//!
//! A capability authorizes exactly one kind of cross-service call: render
//! `content_key` of `pack_id`/`order_id` for `user_id`. The signature covers
//! every claim field; expiry is absolute and checked against the caller's clock.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{TokenError, MIN_SECRET_LEN};

/// Caller-supplied claim fields. `iat`/`exp` are set by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityFields {
    pub user_id: String,
    pub username: String,
    pub pack_id: String,
    pub order_id: String,
    pub content_key: String,
    pub vendor_id: Option<String>,
    pub vendor_username: Option<String>,
}

/// Capability payload. Closed schema: unknown fields fail verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AccessClaim {
    pub user_id: String,
    pub username: String,
    pub pack_id: String,
    pub order_id: String,
    pub content_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_username: Option<String>,
    /// Unix seconds.
    #[serde(rename = "iat")]
    pub issued_at: u64,
    /// Unix seconds. Valid while `now < expires_at`.
    #[serde(rename = "exp")]
    pub expires_at: u64,
}

impl AccessClaim {
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at
    }
}

/// Issues and verifies capability tokens with a shared HMAC-SHA256 secret.
pub struct CapabilityCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for CapabilityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl CapabilityCodec {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::InvalidKey(format!(
                "capability secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }

        // Time checks are done in `verify` against the injected clock, with
        // zero leeway, so expiry stays absolute.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256];
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Sign a claim valid for `[now, now + ttl_secs)`.
    pub fn issue(
        &self,
        fields: CapabilityFields,
        ttl_secs: u64,
        now_secs: u64,
    ) -> Result<String, TokenError> {
        let claim = AccessClaim {
            user_id: fields.user_id,
            username: fields.username,
            pack_id: fields.pack_id,
            order_id: fields.order_id,
            content_key: fields.content_key,
            vendor_id: fields.vendor_id,
            vendor_username: fields.vendor_username,
            issued_at: now_secs,
            expires_at: now_secs.saturating_add(ttl_secs),
        };
        encode(&Header::new(Algorithm::HS256), &claim, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verify signature and schema, then expiry.
    pub fn verify(&self, token: &str, now_secs: u64) -> Result<AccessClaim, TokenError> {
        let data = decode::<AccessClaim>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::InvalidToken)?;
        if data.claims.is_expired_at(now_secs) {
            return Err(TokenError::ExpiredToken);
        }
        Ok(data.claims)
    }
}
