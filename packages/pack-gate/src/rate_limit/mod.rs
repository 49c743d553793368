//! Per-(identity, pack) admission control over sliding minute and hour windows.
//!
//! Window state lives behind the [`WindowStore`] seam. The in-memory store
//! shards keys across a concurrent map so unrelated keys never contend; the
//! check-and-append for one key runs under that key's entry lock. Idle keys
//! are removed by a background sweeper.

mod sweeper;
mod window;

pub use window::RateWindow;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::Error;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use window::HOUR_MS;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub identity: String,
    pub pack_id: String,
}

impl RateKey {
    pub fn new(identity: impl Into<String>, pack_id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            pack_id: pack_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Minute,
    Hour,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Minute => "rate_limit_minute",
            DenyReason::Hour => "rate_limit_hour",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied {
        reason: DenyReason,
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }

    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Admission::Allowed => Ok(()),
            Admission::Denied {
                reason,
                retry_after,
            } => Err(Error::RateLimited {
                reason: reason.as_str(),
                retry_after_secs: retry_after.as_secs().max(1),
            }),
        }
    }
}

/// Storage for rate windows. `admit` must be atomic per key.
pub trait WindowStore: Send + Sync {
    fn admit(&self, key: &RateKey, now_ms: u64, limits: RateLimits) -> Admission;

    /// Remove keys with no check for longer than `idle_ttl_ms`. Returns the count removed.
    fn sweep_idle(&self, now_ms: u64, idle_ttl_ms: u64) -> usize;

    fn key_count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<RateKey, RateWindow>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn admit(&self, key: &RateKey, now_ms: u64, limits: RateLimits) -> Admission {
        // Read-path first so steady-state traffic does not clone the key.
        if let Some(mut window) = self.windows.get_mut(key) {
            return window.check_and_record(now_ms, limits);
        }
        self.windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::new(now_ms))
            .check_and_record(now_ms, limits)
    }

    fn sweep_idle(&self, now_ms: u64, idle_ttl_ms: u64) -> usize {
        let removed = AtomicUsize::new(0);
        self.windows.retain(|_, window| {
            let keep = !window.is_idle(now_ms, idle_ttl_ms);
            if !keep {
                removed.fetch_add(1, Ordering::Relaxed);
            }
            keep
        });
        removed.into_inner()
    }

    fn key_count(&self) -> usize {
        self.windows.len()
    }
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    limits: RateLimits,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Idle TTL is raised to one hour if configured lower, so a swept key
    /// never held live hour-window entries.
    pub fn new(
        store: Arc<dyn WindowStore>,
        limits: RateLimits,
        idle_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let floor = Duration::from_millis(HOUR_MS);
        let idle_ttl = if idle_ttl < floor {
            warn!(
                configured_secs = idle_ttl.as_secs(),
                "Rate-limit idle TTL below one hour, using one hour"
            );
            floor
        } else {
            idle_ttl
        };
        Self {
            store,
            limits,
            idle_ttl,
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(InMemoryWindowStore::new()),
            RateLimits {
                per_minute: config.per_minute,
                per_hour: config.per_hour,
            },
            Duration::from_secs(config.idle_ttl_secs),
            clock,
        )
    }

    pub fn admit(&self, identity: &str, pack_id: &str) -> Admission {
        let key = RateKey::new(identity, pack_id);
        self.store.admit(&key, self.clock.now_ms(), self.limits)
    }

    pub fn sweep_idle(&self) -> usize {
        self.store
            .sweep_idle(self.clock.now_ms(), self.idle_ttl.as_millis() as u64)
    }

    pub fn key_count(&self) -> usize {
        self.store.key_count()
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }
}
