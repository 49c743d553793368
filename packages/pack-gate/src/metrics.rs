//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Delivery ---
    pub delivery_total: AtomicU64,
    pub delivery_success: AtomicU64,
    pub delivery_bytes: AtomicU64,
    pub stream_aborts: AtomicU64,

    // --- Denials by class ---
    pub denied_unauthenticated: AtomicU64,
    pub denied_forbidden: AtomicU64,
    pub denied_rate_limited: AtomicU64,
    pub denied_invalid: AtomicU64,

    // --- Renderer ---
    pub renderer_errors: AtomicU64,
    pub renderer_timeouts: AtomicU64,

    // --- Time to renderer headers (μs, max updated via CAS) ---
    pub delivery_duration_us_sum: AtomicU64,
    pub delivery_duration_us_max: AtomicU64,

    // --- Side paths ---
    pub presign_total: AtomicU64,
    pub integrity_issued: AtomicU64,
    pub integrity_verify_ok: AtomicU64,
    pub integrity_verify_failed: AtomicU64,

    // --- Rate limiter ---
    pub rate_limit_keys_swept: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            delivery_total: AtomicU64::new(0),
            delivery_success: AtomicU64::new(0),
            delivery_bytes: AtomicU64::new(0),
            stream_aborts: AtomicU64::new(0),
            denied_unauthenticated: AtomicU64::new(0),
            denied_forbidden: AtomicU64::new(0),
            denied_rate_limited: AtomicU64::new(0),
            denied_invalid: AtomicU64::new(0),
            renderer_errors: AtomicU64::new(0),
            renderer_timeouts: AtomicU64::new(0),
            delivery_duration_us_sum: AtomicU64::new(0),
            delivery_duration_us_max: AtomicU64::new(0),
            presign_total: AtomicU64::new(0),
            integrity_issued: AtomicU64::new(0),
            integrity_verify_ok: AtomicU64::new(0),
            integrity_verify_failed: AtomicU64::new(0),
            rate_limit_keys_swept: AtomicU64::new(0),
        }
    }

    pub fn record_delivery_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.delivery_duration_us_sum
            .fetch_add(us, Ordering::Relaxed);
        let mut cur = self.delivery_duration_us_max.load(Ordering::Relaxed);
        while us > cur {
            match self.delivery_duration_us_max.compare_exchange_weak(
                cur,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Count a failed delivery under its class.
    pub fn record_delivery_error(&self, err: &Error) {
        let counter = match err {
            Error::Unauthenticated(_) => &self.denied_unauthenticated,
            Error::Forbidden(_) => &self.denied_forbidden,
            Error::RateLimited { .. } => &self.denied_rate_limited,
            Error::InvalidRequest { .. } => &self.denied_invalid,
            Error::GatewayTimeout(_) => &self.renderer_timeouts,
            _ => &self.renderer_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, rate_limit_keys: usize) -> String {
        let delivery_total = self.delivery_total.load(Ordering::Relaxed);
        let delivery_success = self.delivery_success.load(Ordering::Relaxed);
        let delivery_bytes = self.delivery_bytes.load(Ordering::Relaxed);
        let stream_aborts = self.stream_aborts.load(Ordering::Relaxed);
        let unauthenticated = self.denied_unauthenticated.load(Ordering::Relaxed);
        let forbidden = self.denied_forbidden.load(Ordering::Relaxed);
        let rate_limited = self.denied_rate_limited.load(Ordering::Relaxed);
        let invalid = self.denied_invalid.load(Ordering::Relaxed);
        let renderer_errors = self.renderer_errors.load(Ordering::Relaxed);
        let renderer_timeouts = self.renderer_timeouts.load(Ordering::Relaxed);
        let dur_sum = self.delivery_duration_us_sum.load(Ordering::Relaxed);
        let dur_max = self.delivery_duration_us_max.swap(0, Ordering::Relaxed);
        let presign_total = self.presign_total.load(Ordering::Relaxed);
        let integrity_issued = self.integrity_issued.load(Ordering::Relaxed);
        let integrity_ok = self.integrity_verify_ok.load(Ordering::Relaxed);
        let integrity_failed = self.integrity_verify_failed.load(Ordering::Relaxed);
        let keys_swept = self.rate_limit_keys_swept.load(Ordering::Relaxed);

        let dur_sum_s = dur_sum as f64 / 1_000_000.0;
        let dur_max_s = dur_max as f64 / 1_000_000.0;

        format!(
            "\
# HELP pack_gate_delivery_total Pack content requests received.\n\
# TYPE pack_gate_delivery_total counter\n\
pack_gate_delivery_total {delivery_total}\n\
# HELP pack_gate_delivery_success_total Deliveries whose renderer stream started.\n\
# TYPE pack_gate_delivery_success_total counter\n\
pack_gate_delivery_success_total {delivery_success}\n\
# HELP pack_gate_delivery_bytes_total Watermarked bytes relayed to clients.\n\
# TYPE pack_gate_delivery_bytes_total counter\n\
pack_gate_delivery_bytes_total {delivery_bytes}\n\
# HELP pack_gate_stream_aborts_total Relays aborted by an upstream read failure.\n\
# TYPE pack_gate_stream_aborts_total counter\n\
pack_gate_stream_aborts_total {stream_aborts}\n\
# HELP pack_gate_denied_total Requests refused before rendering, by class.\n\
# TYPE pack_gate_denied_total counter\n\
pack_gate_denied_total{{class=\"unauthenticated\"}} {unauthenticated}\n\
pack_gate_denied_total{{class=\"forbidden\"}} {forbidden}\n\
pack_gate_denied_total{{class=\"rate_limited\"}} {rate_limited}\n\
pack_gate_denied_total{{class=\"invalid_request\"}} {invalid}\n\
# HELP pack_gate_renderer_errors_total Renderer or upstream failures.\n\
# TYPE pack_gate_renderer_errors_total counter\n\
pack_gate_renderer_errors_total {renderer_errors}\n\
# HELP pack_gate_renderer_timeouts_total Renderer calls that timed out.\n\
# TYPE pack_gate_renderer_timeouts_total counter\n\
pack_gate_renderer_timeouts_total {renderer_timeouts}\n\
# HELP pack_gate_delivery_duration_seconds_sum Total time to renderer headers (seconds).\n\
# TYPE pack_gate_delivery_duration_seconds_sum counter\n\
pack_gate_delivery_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP pack_gate_delivery_duration_seconds_max Max time to renderer headers since last scrape (seconds).\n\
# TYPE pack_gate_delivery_duration_seconds_max gauge\n\
pack_gate_delivery_duration_seconds_max {dur_max_s:.6}\n\
# HELP pack_gate_presign_total Pre-signed URLs issued.\n\
# TYPE pack_gate_presign_total counter\n\
pack_gate_presign_total {presign_total}\n\
# HELP pack_gate_integrity_issued_total Integrity tokens issued.\n\
# TYPE pack_gate_integrity_issued_total counter\n\
pack_gate_integrity_issued_total {integrity_issued}\n\
# HELP pack_gate_integrity_verify_total Integrity token verifications, by result.\n\
# TYPE pack_gate_integrity_verify_total counter\n\
pack_gate_integrity_verify_total{{result=\"valid\"}} {integrity_ok}\n\
pack_gate_integrity_verify_total{{result=\"invalid\"}} {integrity_failed}\n\
# HELP pack_gate_rate_limit_keys_swept_total Idle rate-limit keys removed.\n\
# TYPE pack_gate_rate_limit_keys_swept_total counter\n\
pack_gate_rate_limit_keys_swept_total {keys_swept}\n\
# HELP pack_gate_rate_limit_keys Tracked (identity, pack) keys.\n\
# TYPE pack_gate_rate_limit_keys gauge\n\
pack_gate_rate_limit_keys {rate_limit_keys}\n"
        )
    }
}
