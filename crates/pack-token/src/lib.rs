//! Capability and integrity tokens for pack content delivery.
//! Pure logic with explicit timestamps. Usable by the gate and by the
//! watermark renderer that verifies what the gate issued.

mod capability;
mod error;
mod integrity;

pub use capability::{AccessClaim, CapabilityCodec, CapabilityFields};
pub use error::TokenError;
pub use integrity::{
    build_integrity_message, build_integrity_payload, IntegrityCodec, IntegrityToken,
    INTEGRITY_DOMAIN,
};

/// Shortest secret accepted by either codec.
pub const MIN_SECRET_LEN: usize = 32;
