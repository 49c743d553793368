//! Background removal of idle rate-limit keys.

use super::RateLimiter;
use crate::metrics::METRICS;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

impl RateLimiter {
    /// Sweep idle keys every `interval` until `cancel` fires.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = cancel.cancelled() => {
                    info!("Rate-limit sweeper shutting down");
                    return;
                }
            }

            let removed = self.sweep_idle();
            METRICS
                .rate_limit_keys_swept
                .fetch_add(removed as u64, Ordering::Relaxed);
            if removed > 0 {
                debug!(removed, remaining = self.key_count(), "Swept idle rate-limit keys");
            }
        }
    }
}
