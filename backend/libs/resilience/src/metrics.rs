/// Prometheus metrics for resilience patterns
#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static TIMEOUT_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_timeout_operations_total",
        "Total number of timeout operations",
        &["result"]
    )
    .expect("Failed to register timeout operations metric")
});

#[cfg(feature = "metrics")]
static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "resilience_retry_attempts",
        "Number of attempts before success or terminal failure",
        &["result"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0, 21.0]
    )
    .expect("Failed to register retry attempts metric")
});

/// Metrics collector for timeouts
#[cfg(feature = "metrics")]
pub struct TimeoutMetrics;

#[cfg(feature = "metrics")]
impl TimeoutMetrics {
    pub fn record_operation(result: &str) {
        TIMEOUT_OPERATIONS.with_label_values(&[result]).inc();
    }
}

/// Metrics collector for retries
#[cfg(feature = "metrics")]
pub struct RetryMetrics;

#[cfg(feature = "metrics")]
impl RetryMetrics {
    pub fn record_attempts(result: &str, attempts: u32) {
        RETRY_ATTEMPTS
            .with_label_values(&[result])
            .observe(attempts as f64);
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct TimeoutMetrics;

#[cfg(not(feature = "metrics"))]
impl TimeoutMetrics {
    pub fn record_operation(_result: &str) {}
}

#[cfg(not(feature = "metrics"))]
pub struct RetryMetrics;

#[cfg(not(feature = "metrics"))]
impl RetryMetrics {
    pub fn record_attempts(_result: &str, _attempts: u32) {}
}
