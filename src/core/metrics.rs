//! Prometheus metrics
//!
//! Tracks request volume per operation, failures per error kind, jobs in
//! flight and temp artifact cleanups. Rendered on `GET /metrics`.

#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

/// Requests received by operation
/// Labels: operation (formats/download/process/files)
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mediagate_requests_total",
        "Total number of requests by operation",
        &["operation"]
    )
    .expect("requests metric registers once")
});

/// Failed requests by operation and error kind
/// Labels: operation, kind
pub static FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mediagate_failures_total",
        "Total number of failed requests by error kind",
        &["operation", "kind"]
    )
    .expect("failures metric registers once")
});

/// Extraction jobs currently holding a subprocess
pub static ACTIVE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("mediagate_active_jobs", "Extraction jobs currently running")
        .expect("active jobs metric registers once")
});

/// Temp artifacts removed from the scratch directory
pub static ARTIFACT_CLEANUPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mediagate_artifact_cleanups_total",
        "Total number of temp artifact cleanups"
    )
    .expect("cleanup metric registers once")
});

pub fn record_request(operation: &str) {
    REQUESTS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_failure(operation: &str, kind: &str) {
    FAILURES_TOTAL.with_label_values(&[operation, kind]).inc();
}

/// Increments the active job gauge until dropped.
#[derive(Debug)]
pub struct ActiveJobGuard(());

impl ActiveJobGuard {
    pub fn new() -> Self {
        ACTIVE_JOBS.inc();
        Self(())
    }
}

impl Default for ActiveJobGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        ACTIVE_JOBS.dec();
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_increments() {
        let before = REQUESTS_TOTAL.with_label_values(&["unit_test_op"]).get();
        record_request("unit_test_op");
        assert_eq!(REQUESTS_TOTAL.with_label_values(&["unit_test_op"]).get(), before + 1);
    }

    #[test]
    fn test_render_contains_registered_metrics() {
        record_failure("unit_test_op", "invalid_input");
        let (content_type, body) = render().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("mediagate_failures_total"));
    }
}
