//! # pack-gate
//!
//! Gated, time-limited delivery of purchased pack content. Every payload is
//! watermarked per buyer by an external renderer and streamed through; no
//! permanent public URL is ever handed out for pack content.
//!
//! ## Endpoints
//! - `GET /v1/pack-content` - Watermarked content stream (bearer credential)
//! - `POST /v1/presign` - Short-lived direct URL for public media
//! - `POST /v1/integrity-token` - Issue an integrity token for an owned pack
//! - `GET /v1/integrity-token/verify` - Partner-side token check (service key)
//! - `GET /health`, `GET /ready`, `GET /metrics`

pub mod access;
pub mod clock;
pub mod config;
pub mod content_key;
pub mod delivery;
mod error;
mod handlers;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod middleware;
pub mod presign;
pub mod rate_limit;
pub mod renderer;
pub mod response;
mod router;
mod state;

pub use config::Config;
pub use error::Error;
pub use router::create as create_router;
pub use state::{AppState, Collaborators};
