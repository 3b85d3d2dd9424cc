use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref NODE_UP: IntGauge = register_int_gauge!(
        "splicer_up",
        "Whether the splicer is up (1) or down (0)"
    ).unwrap();

    // Query metrics
    pub static ref QUERY_COUNTER: IntCounter = register_int_counter!(
        "splicer_queries_total",
        "Total number of top-level queries received"
    ).unwrap();

    pub static ref QUERY_DURATION: Histogram = register_histogram!(
        "splicer_query_duration_seconds",
        "Top-level query duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    ).unwrap();

    // Dispatch metrics
    pub static ref SLICES_DISPATCHED: IntCounter = register_int_counter!(
        "splicer_slices_dispatched_total",
        "Total number of slices sent to a backend"
    ).unwrap();

    pub static ref SLICE_FAILURES: IntCounter = register_int_counter!(
        "splicer_slice_failures_total",
        "Total number of slices that failed to execute"
    ).unwrap();

    pub static ref BACKEND_ROUND_TRIP_TIME: Histogram = register_histogram!(
        "splicer_backend_round_trip_seconds",
        "Round trip time of one backend call",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();

    pub static ref HOST_FALLBACKS: IntCounter = register_int_counter!(
        "splicer_host_fallbacks_total",
        "Slices routed to a host other than the resolved one"
    ).unwrap();

    pub static ref CACHE_HITS: IntCounter = register_int_counter!(
        "splicer_cache_hits_total",
        "Slices answered from the read-through cache"
    ).unwrap();
}

pub fn init_metrics() {
    NODE_UP.set(1);
}

pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn new() -> Self {
        QUERY_COUNTER.inc();
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        QUERY_DURATION.observe(duration);
    }
}

pub fn record_slice_dispatched() {
    SLICES_DISPATCHED.inc();
}

pub fn record_slice_failure() {
    SLICE_FAILURES.inc();
}

pub fn record_backend_rtt(duration: f64) {
    BACKEND_ROUND_TRIP_TIME.observe(duration);
}

pub fn record_host_fallback() {
    HOST_FALLBACKS.inc();
}

pub fn record_cache_hit() {
    CACHE_HITS.inc();
}

/// Renders the default registry in the text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
