//! Dual sliding window for one (identity, pack) key.

use super::{Admission, DenyReason, RateLimits};
use std::collections::VecDeque;
use std::time::Duration;

pub(crate) const MINUTE_MS: u64 = 60_000;
pub(crate) const HOUR_MS: u64 = 3_600_000;

/// Admission timestamps (ms) inside the trailing minute and hour.
#[derive(Debug, Default)]
pub struct RateWindow {
    minute: VecDeque<u64>,
    hour: VecDeque<u64>,
    last_seen_ms: u64,
}

impl RateWindow {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_seen_ms: now_ms,
            ..Default::default()
        }
    }

    /// Evict, count, then append on admission. Minute is checked first.
    pub fn check_and_record(&mut self, now_ms: u64, limits: RateLimits) -> Admission {
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
        evict(&mut self.minute, now_ms, MINUTE_MS);
        evict(&mut self.hour, now_ms, HOUR_MS);

        if self.minute.len() >= limits.per_minute as usize {
            return Admission::Denied {
                reason: DenyReason::Minute,
                retry_after: retry_after(&self.minute, now_ms, MINUTE_MS),
            };
        }
        if self.hour.len() >= limits.per_hour as usize {
            return Admission::Denied {
                reason: DenyReason::Hour,
                retry_after: retry_after(&self.hour, now_ms, HOUR_MS),
            };
        }

        self.minute.push_back(now_ms);
        self.hour.push_back(now_ms);
        Admission::Allowed
    }

    /// No check for longer than `idle_ttl_ms`.
    pub fn is_idle(&self, now_ms: u64, idle_ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > idle_ttl_ms
    }

    #[cfg(test)]
    fn minute_count(&self) -> usize {
        self.minute.len()
    }

    #[cfg(test)]
    fn hour_count(&self) -> usize {
        self.hour.len()
    }
}

/// Drop entries at least `span_ms` old. Entries stamped after `now_ms` stay.
fn evict(queue: &mut VecDeque<u64>, now_ms: u64, span_ms: u64) {
    while queue
        .front()
        .is_some_and(|&t| now_ms.checked_sub(t).is_some_and(|age| age >= span_ms))
    {
        queue.pop_front();
    }
}

/// Time until the oldest entry leaves the window, rounded up to whole seconds.
fn retry_after(queue: &VecDeque<u64>, now_ms: u64, span_ms: u64) -> Duration {
    let wait_ms = queue
        .front()
        .map(|&oldest| (oldest + span_ms).saturating_sub(now_ms))
        .unwrap_or(0);
    Duration::from_secs(wait_ms.div_ceil(1000).max(1))
}
