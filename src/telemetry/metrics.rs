//! Prometheus metrics setup and metric definitions

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    // Default histogram buckets (seconds), with sub-millisecond buckets for fast endpoints.
    let buckets = vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(&buckets)
        .context("failed to set histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Register metric descriptions so Prometheus output includes HELP/TYPE lines
/// from startup (not just after first use).
pub fn describe_metrics() {
    // HTTP metrics
    describe_counter!(
        "portico_http_requests_total",
        "Total number of HTTP requests"
    );
    describe_histogram!(
        "portico_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        "portico_rate_limit_throttled_total",
        "Total number of rate-limited requests"
    );
    describe_counter!(
        "portico_rate_limit_fallback_total",
        "Rate-limit decisions served by the local fallback after a Redis failure"
    );
    describe_counter!(
        "portico_injection_detected_total",
        "Requests flagged by the injection screen"
    );
    describe_counter!(
        "portico_errors_total",
        "Failed requests by error kind"
    );
}
