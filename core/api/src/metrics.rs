// gamedetect/core/api/src/metrics.rs

use gamedetect_service::SelfTestSummary;
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_gauge_vec, register_histogram_vec, Encoder, TextEncoder};

// Classification Metrics
pub static CLASSIFY_REQUEST_COUNT: Lazy<prometheus::CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gamedetect_classify_requests_total",
        "Total number of classification requests",
        &["status"]
    )
    .expect("Failed to register classify request count metric")
});

pub static CLASSIFY_DURATION: Lazy<prometheus::HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gamedetect_classify_duration_seconds",
        "Classification duration in seconds, lock wait included",
        &["status"]
    )
    .expect("Failed to register classify duration metric")
});

// Self-test Metrics
pub static SELF_TEST_RESULTS: Lazy<prometheus::GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "gamedetect_self_test_results",
        "Outcome counts of the most recent self-test sweep",
        &["outcome"]
    )
    .expect("Failed to register self-test results metric")
});

/// Record one classification request
pub fn record_classification(duration: f64, status: &str) {
    CLASSIFY_DURATION
        .with_label_values(&[status])
        .observe(duration);
    CLASSIFY_REQUEST_COUNT.with_label_values(&[status]).inc();
}

/// Publish the summary of a finished sweep
pub fn update_self_test_metrics(summary: &SelfTestSummary) {
    SELF_TEST_RESULTS
        .with_label_values(&["pass"])
        .set(summary.passed as f64);
    SELF_TEST_RESULTS
        .with_label_values(&["fail"])
        .set(summary.failed as f64);
    SELF_TEST_RESULTS
        .with_label_values(&["read_error"])
        .set(summary.read_errors as f64);
}

/// Render the default registry in the text exposition format
pub fn encode() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
