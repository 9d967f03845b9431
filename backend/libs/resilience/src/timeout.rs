/// Timeout wrapper for async operations
use crate::metrics::TimeoutMetrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => {
            TimeoutMetrics::record_operation("completed");
            Ok(result)
        }
        Err(_) => {
            TimeoutMetrics::record_operation("elapsed");
            Err(TimeoutError::Elapsed(duration))
        }
    }
}
