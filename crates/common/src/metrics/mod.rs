//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency histograms sized for model calls
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all arena metrics
pub const METRICS_PREFIX: &str = "arena";

/// Histogram buckets for API request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for image generation latency (model calls take seconds)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total model generation requests"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Model generation latency in seconds"
    );

    describe_counter!(
        format!("{}_generation_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total model generation errors"
    );

    // Dispatch metrics
    describe_histogram!(
        format!("{}_dispatch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Multi-model dispatch latency in seconds"
    );

    describe_counter!(
        format!("{}_dispatch_images_total", METRICS_PREFIX),
        Unit::Count,
        "Images returned by multi-model dispatch"
    );

    // Vote metrics
    describe_counter!(
        format!("{}_votes_total", METRICS_PREFIX),
        Unit::Count,
        "Total votes recorded"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record one model call
pub fn record_generation(model: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_generation_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a completed dispatch
pub fn record_dispatch(duration_secs: f64, images: usize) {
    histogram!(format!("{}_dispatch_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    counter!(format!("{}_dispatch_images_total", METRICS_PREFIX)).increment(images as u64);
}

/// Helper to record a vote
pub fn record_vote(study: &str, winner: &str) {
    counter!(
        format!("{}_votes_total", METRICS_PREFIX),
        "study" => study.to_string(),
        "winner" => winner.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, GENERATION_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/v1/arena/vote");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
