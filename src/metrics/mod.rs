//! Metrics module
//!
//! Prometheus metrics for the upload pipeline. Everything is registered in
//! the default registry on first use and exposed by [`server::MetricsServer`].

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge, Counter,
    CounterVec, HistogramVec, IntGauge,
};

lazy_static! {
    // Job metrics
    pub static ref JOBS_TOTAL: CounterVec = register_counter_vec!(
        "funnel_jobs_total",
        "Upload jobs that reached a terminal state",
        &["outcome"]
    ).unwrap();

    pub static ref JOB_DURATION: HistogramVec = register_histogram_vec!(
        "funnel_job_duration_seconds",
        "Time from enqueue to terminal state, retries included",
        &["outcome"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    pub static ref IN_FLIGHT_JOBS: IntGauge = register_int_gauge!(
        "funnel_in_flight_jobs",
        "Jobs enqueued but not yet completed or failed"
    ).unwrap();

    // Attempt metrics
    pub static ref ATTEMPT_FAILURES: CounterVec = register_counter_vec!(
        "funnel_attempt_failures_total",
        "Failed upload attempts",
        &["kind"]  // "render" or "upload"
    ).unwrap();

    pub static ref RETRIES_SCHEDULED: Counter = register_counter!(
        "funnel_retries_scheduled_total",
        "Failed attempts sent back for another try"
    ).unwrap();

    // Transfer metrics
    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "funnel_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();
}

/// Record a job reaching the completed or failed queue
pub fn record_job_finished(outcome: &str, duration_secs: f64) {
    JOBS_TOTAL.with_label_values(&[outcome]).inc();
    JOB_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

/// Record one failed attempt
pub fn record_attempt_failed(kind: &str) {
    ATTEMPT_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_retry_scheduled() {
    RETRIES_SCHEDULED.inc();
}

/// Record bytes sent by a successful upload
pub fn record_bytes_uploaded(bytes: u64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_job_finished() {
        let before = JOBS_TOTAL.with_label_values(&["completed"]).get();
        record_job_finished("completed", 0.25);
        assert!(JOBS_TOTAL.with_label_values(&["completed"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_attempt_failed() {
        record_attempt_failed("upload");
        record_retry_scheduled();
        assert!(ATTEMPT_FAILURES.with_label_values(&["upload"]).get() >= 1.0);
        assert!(RETRIES_SCHEDULED.get() >= 1.0);
    }

    #[test]
    fn test_record_bytes_uploaded() {
        let before = UPLOAD_BYTES_TOTAL.get();
        record_bytes_uploaded(1024);
        assert!(UPLOAD_BYTES_TOTAL.get() >= before + 1024.0);
    }
}
