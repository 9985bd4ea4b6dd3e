use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Attempt lifecycle metrics
    pub static ref ATTEMPTS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_started_total",
        "Quiz attempts created",
        &["timed"]
    )
    .unwrap();

    pub static ref ATTEMPTS_FINALIZED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_finalized_total",
        "Quiz attempts finalized, by trigger and race outcome",
        &["trigger", "outcome"]
    )
    .unwrap();

    // Scheduler metrics
    pub static ref SCHEDULER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "scheduler_ticks_total",
        "Auto-submit worker ticks",
        &["status"]
    )
    .unwrap();

    // Leaderboard cache metrics
    pub static ref LEADERBOARD_CACHE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "leaderboard_cache_total",
        "Leaderboard cache lookups",
        &["result"]
    )
    .unwrap();
}

pub fn record_attempt_started(timed: bool) {
    let label = if timed { "true" } else { "false" };
    ATTEMPTS_STARTED_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_finalize(trigger: &str, outcome: &str) {
    ATTEMPTS_FINALIZED_TOTAL
        .with_label_values(&[trigger, outcome])
        .inc();
}

pub fn record_cache_hit() {
    LEADERBOARD_CACHE_TOTAL.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    LEADERBOARD_CACHE_TOTAL.with_label_values(&["miss"]).inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_renders_registered_counters() {
        record_attempt_started(true);
        record_finalize("manual", "won");
        let rendered = gather_metrics();
        assert!(rendered.contains("attempts_started_total"));
        assert!(rendered.contains("attempts_finalized_total"));
    }
}
