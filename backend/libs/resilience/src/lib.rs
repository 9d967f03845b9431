/// Resilience patterns for the event relay
///
/// This library provides the building blocks the relay wraps around broker I/O:
/// - **Retry policy**: configurable backoff strategies (immediate, fixed intervals,
///   incremental, exponential) with an attempt limit and an allow/deny failure filter
/// - **Timeout**: enforces time limits on polls and other external calls
/// - **Shutdown**: a cooperative cancellation signal honoured by every wait
///
/// # Example: retry a publish with exponential backoff
///
/// ```rust,no_run
/// use resilience::{with_retry_policy, Classify, RetryPolicy, RetryStrategy, Shutdown};
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct Flaky;
///
/// impl std::fmt::Display for Flaky {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "broker unavailable")
///     }
/// }
///
/// impl Classify for Flaky {
///     type Kind = &'static str;
///     fn kind(&self) -> Self::Kind {
///         "transient"
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let policy = RetryPolicy::new(
///         RetryStrategy::Exponential {
///             min: Duration::from_millis(100),
///             max: Duration::from_secs(5),
///             factor: 2.0,
///         },
///         5,
///     );
///     let shutdown = Shutdown::new();
///     let mut listener = shutdown.listener();
///
///     let result = with_retry_policy(&policy, "orders[0]@42", &mut listener, |_ctx| async {
///         Err::<(), _>(Flaky)
///     })
///     .await;
///     assert!(result.is_err());
/// }
/// ```

pub mod metrics;
pub mod retry;
pub mod shutdown;
pub mod timeout;

// Re-export main types for convenience
pub use retry::{
    with_retry_policy, Classify, RetryContext, RetryError, RetryFilter, RetryPolicy, RetryStrategy,
};
pub use shutdown::{Shutdown, ShutdownListener};
pub use timeout::{with_timeout, TimeoutError};
