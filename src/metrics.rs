use metrics::{counter, gauge, histogram};
use std::time::Instant;

// ── Metric names ────────────────────────────────────────────────────────

/// Total HTTP requests by endpoint and status
pub const REQUESTS_TOTAL: &str = "torii_requests_total";
/// Request duration in seconds
pub const REQUEST_DURATION: &str = "torii_request_duration_seconds";
/// Cache hits by tier
pub const CACHE_HITS: &str = "torii_cache_hits_total";
/// Cache misses (both tiers empty)
pub const CACHE_MISSES: &str = "torii_cache_misses_total";
/// Origin fetch errors
pub const ORIGIN_FETCH_ERRORS: &str = "torii_origin_fetch_errors_total";
/// SSRF guard rejections
pub const SSRF_REJECTIONS: &str = "torii_ssrf_rejections_total";
/// Pre-warm jobs scheduled
pub const PREWARM_SCHEDULED: &str = "torii_prewarm_scheduled_total";
/// Live signed handles
pub const ACTIVE_HANDLES: &str = "torii_active_handles";

// ── Recording helpers ───────────────────────────────────────────────────

/// Record an incoming request
pub fn record_request(endpoint: &str, status: u16) {
    counter!(REQUESTS_TOTAL, "endpoint" => endpoint.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record request duration
pub fn record_duration(endpoint: &str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    histogram!(REQUEST_DURATION, "endpoint" => endpoint.to_string()).record(duration);
}

/// Record a cache hit on the given tier
pub fn record_cache_hit(tier: &str) {
    counter!(CACHE_HITS, "tier" => tier.to_string()).increment(1);
}

/// Record a full cache miss
pub fn record_cache_miss() {
    counter!(CACHE_MISSES).increment(1);
}

/// Record an origin fetch error
pub fn record_origin_error() {
    counter!(ORIGIN_FETCH_ERRORS).increment(1);
}

/// Record an SSRF guard rejection
pub fn record_ssrf_rejection() {
    counter!(SSRF_REJECTIONS).increment(1);
}

/// Record scheduled pre-warm jobs
pub fn record_prewarm_scheduled(count: usize) {
    counter!(PREWARM_SCHEDULED).increment(count as u64);
}

/// Update the live signed-handle count
pub fn set_active_handles(count: usize) {
    gauge!(ACTIVE_HANDLES).set(count as f64);
}
