//! Keyed integrity digests for stateless server-to-server re-verification.
//!
//! Message format: `{INTEGRITY_DOMAIN}\0{payload_json}` where the payload binds
//! user, pack, order and the absolute expiry. Both sides re-derive the digest
//! from the same inputs and compare in constant time.

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{TokenError, MIN_SECRET_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Domain separator; bump the version when the payload layout changes.
pub const INTEGRITY_DOMAIN: &str = "pack-gate:integrity:v1";

const DIGEST_LEN: usize = 32;

/// Hex digest plus the expiry it was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityToken {
    pub digest: String,
    pub expires_at: u64,
}

/// Payload JSON in fixed key order. Requires `serde_json` `preserve_order`.
pub fn build_integrity_payload(
    user_id: &str,
    pack_id: &str,
    order_id: &str,
    expires_at: u64,
) -> Value {
    json!({
        "user_id": user_id,
        "pack_id": pack_id,
        "order_id": order_id,
        "expires_at": expires_at.to_string(),
    })
}

pub fn build_integrity_message(payload: &Value) -> Vec<u8> {
    let payload_bytes = payload.to_string().into_bytes();
    let mut message = INTEGRITY_DOMAIN.as_bytes().to_vec();
    message.reserve_exact(1 + payload_bytes.len());
    message.push(0);
    message.extend_from_slice(&payload_bytes);
    message
}

pub struct IntegrityCodec {
    keyed: HmacSha256,
    ttl_secs: u64,
}

impl std::fmt::Debug for IntegrityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityCodec")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl IntegrityCodec {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::InvalidKey(format!(
                "integrity secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        Ok(Self { keyed, ttl_secs })
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a token expiring `ttl_secs` after `now_secs`.
    pub fn issue(&self, user_id: &str, pack_id: &str, order_id: &str, now_secs: u64) -> IntegrityToken {
        let expires_at = now_secs.saturating_add(self.ttl_secs);
        IntegrityToken {
            digest: self.digest(user_id, pack_id, order_id, expires_at),
            expires_at,
        }
    }

    /// Deterministic lowercase-hex digest.
    pub fn digest(&self, user_id: &str, pack_id: &str, order_id: &str, expires_at: u64) -> String {
        hex::encode(self.mac(user_id, pack_id, order_id, expires_at))
    }

    /// False on expiry, an expiry beyond this codec's TTL, bad hex, or mismatch.
    pub fn verify(
        &self,
        token_hex: &str,
        user_id: &str,
        pack_id: &str,
        order_id: &str,
        expires_at: u64,
        now_secs: u64,
    ) -> bool {
        if now_secs >= expires_at || expires_at > now_secs.saturating_add(self.ttl_secs) {
            return false;
        }
        let provided = match hex::decode(token_hex) {
            Ok(bytes) if bytes.len() == DIGEST_LEN => bytes,
            _ => return false,
        };
        let expected = self.mac(user_id, pack_id, order_id, expires_at);
        provided.as_slice().ct_eq(&expected).into()
    }

    fn mac(&self, user_id: &str, pack_id: &str, order_id: &str, expires_at: u64) -> [u8; DIGEST_LEN] {
        let payload = build_integrity_payload(user_id, pack_id, order_id, expires_at);
        let message = build_integrity_message(&payload);
        let mut mac = self.keyed.clone();
        mac.update(&message);
        mac.finalize().into_bytes().into()
    }
}
