//! Prometheus metrics for BleepGate.
//!
//! Metrics are recorded through the `metrics` facade.  When enabled, a
//! global recorder from `metrics-exporter-prometheus` is installed; with a
//! `metrics_addr` configured it also serves the exposition text on its own
//! listener, so no scrape path competes with bucket names on the main port.
//! Without a recorder the macros are no-ops.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ObservabilityConfig;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: operation, status.
pub const HTTP_REQUESTS_TOTAL: &str = "bleepgate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: operation.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "bleepgate_http_request_duration_seconds";

/// Requests halted by a pipeline stage (counter). Labels: stage.
pub const PIPELINE_REJECTIONS_TOTAL: &str = "bleepgate_pipeline_rejections_total";

/// Total bytes received in request bodies (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "bleepgate_bytes_received_total";

/// Label used for requests that never resolved to an operation.
pub const UNRESOLVED: &str = "Unresolved";

// -- Recorder installation ----------------------------------------------------

/// Install the global recorder according to `config`.  Must run inside the
/// tokio runtime when a listener address is configured.
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if !config.metrics {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    match &config.metrics_addr {
        Some(addr) => {
            let addr: SocketAddr = addr.parse()?;
            builder.with_http_listener(addr).install()?;
            tracing::info!("Prometheus exporter listening on {addr}");
        }
        None => {
            builder.install_recorder()?;
        }
    }
    describe_metrics();
    Ok(())
}

/// Register metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests by operation");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        PIPELINE_REJECTIONS_TOTAL,
        "Requests halted by a pipeline stage"
    );
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (request bodies)");
}

// -- Recording helpers --------------------------------------------------------

/// Record one finished request.
pub fn record_request(operation: &'static str, status: u16, elapsed: Duration, body_len: usize) {
    counter!(HTTP_REQUESTS_TOTAL, "operation" => operation, "status" => status.to_string())
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "operation" => operation)
        .record(elapsed.as_secs_f64());
    counter!(BYTES_RECEIVED_TOTAL).increment(body_len as u64);
}

/// Record a request halted by `stage`.
pub fn record_rejection(stage: &'static str) {
    counter!(PIPELINE_REJECTIONS_TOTAL, "stage" => stage).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = ObservabilityConfig {
            metrics: false,
            metrics_addr: Some("not an address".to_string()),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("ListBuckets", 200, Duration::from_millis(3), 0);
        record_rejection("authentication");
    }
}
