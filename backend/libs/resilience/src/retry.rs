/// Retry policy engine: backoff strategies, attempt limits and failure filtering
use crate::metrics::RetryMetrics;
use crate::shutdown::ShutdownListener;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff strategy applied between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Never retry; the first failure is terminal
    None,
    /// Retry straight away without waiting
    Immediate,
    /// Wait according to a fixed schedule; the last interval repeats once exhausted
    Intervals(Vec<Duration>),
    /// Wait `initial`, then `initial + step`, `initial + 2*step`, ...
    Incremental { initial: Duration, step: Duration },
    /// Wait `min * factor^(n-1)`, capped at `max`
    Exponential {
        min: Duration,
        max: Duration,
        factor: f64,
    },
}

impl RetryStrategy {
    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let step_index = retry.saturating_sub(1);

        match self {
            RetryStrategy::None | RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Intervals(schedule) => schedule
                .get(step_index as usize)
                .or_else(|| schedule.last())
                .copied()
                .unwrap_or(Duration::ZERO),
            RetryStrategy::Incremental { initial, step } => {
                initial.saturating_add(step.saturating_mul(step_index))
            }
            RetryStrategy::Exponential { min, max, factor } => {
                let scaled = min.as_millis() as f64 * factor.powi(step_index as i32);
                let capped = scaled.min(max.as_millis() as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RetryStrategy::None => "none",
            RetryStrategy::Immediate => "immediate",
            RetryStrategy::Intervals(_) => "interval",
            RetryStrategy::Incremental { .. } => "incremental",
            RetryStrategy::Exponential { .. } => "exponential",
        }
    }
}

/// Allow/deny filter over failure kinds.
///
/// The deny-list always wins. An empty allow-list retries every kind that is not denied.
#[derive(Debug, Clone)]
pub struct RetryFilter<K> {
    handle: Vec<K>,
    ignore: Vec<K>,
}

impl<K> Default for RetryFilter<K> {
    fn default() -> Self {
        Self {
            handle: Vec::new(),
            ignore: Vec::new(),
        }
    }
}

impl<K: PartialEq> RetryFilter<K> {
    pub fn new(handle: Vec<K>, ignore: Vec<K>) -> Self {
        Self { handle, ignore }
    }

    /// Add a kind to the allow-list
    pub fn handle(mut self, kind: K) -> Self {
        self.handle.push(kind);
        self
    }

    /// Add a kind to the deny-list
    pub fn ignore(mut self, kind: K) -> Self {
        self.ignore.push(kind);
        self
    }

    pub fn should_retry(&self, kind: &K) -> bool {
        if self.ignore.contains(kind) {
            return false;
        }
        self.handle.is_empty() || self.handle.contains(kind)
    }
}

/// Strategy, attempt limit and filter bundled together
#[derive(Debug, Clone)]
pub struct RetryPolicy<K> {
    pub strategy: RetryStrategy,
    /// Maximum number of retries after the first attempt
    pub limit: u32,
    pub filter: RetryFilter<K>,
}

impl<K> RetryPolicy<K> {
    pub fn new(strategy: RetryStrategy, limit: u32) -> Self {
        Self {
            strategy,
            limit,
            filter: RetryFilter::default(),
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self::new(RetryStrategy::None, 0)
    }

    pub fn immediate(limit: u32) -> Self {
        Self::new(RetryStrategy::Immediate, limit)
    }

    pub fn with_filter(mut self, filter: RetryFilter<K>) -> Self {
        self.filter = filter;
        self
    }

    /// Effective retry budget; `RetryStrategy::None` never retries whatever the limit says.
    pub fn max_retries(&self) -> u32 {
        match self.strategy {
            RetryStrategy::None => 0,
            _ => self.limit,
        }
    }
}

/// Failure classification consulted by the retry filter.
pub trait Classify {
    type Kind: PartialEq + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Per-unit-of-work retry bookkeeping; discarded once the work resolves.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// What is being retried, e.g. message coordinates
    pub subject: String,
    /// 1-based attempt currently running
    pub attempt: u32,
    pub max_retries: u32,
    pub strategy: &'static str,
    pub last_error: Option<String>,
}

impl RetryContext {
    fn new(subject: &str, max_retries: u32, strategy: &'static str) -> Self {
        Self {
            subject: subject.to_string(),
            attempt: 0,
            max_retries,
            strategy,
            last_error: None,
        }
    }

    /// Retries performed so far (attempts after the first)
    pub fn retries(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },
    #[error("non-retryable failure after {attempts} attempts: {error}")]
    NotRetryable { attempts: u32, error: E },
    #[error("cancelled by shutdown after {attempts} attempts")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::NotRetryable { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Retries performed before the engine gave up
    pub fn retries(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The last underlying failure, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { error, .. } | RetryError::NotRetryable { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Run `operation` under `policy`.
///
/// Each attempt and each backoff wait is raced against `shutdown`; an attempt still in
/// flight when shutdown fires is dropped and the result is [`RetryError::Cancelled`].
///
/// The engine only decides whether to try again. It never decides what happens to the
/// work once retries are exhausted; that disposition belongs to the caller.
pub async fn with_retry_policy<F, Fut, T, E>(
    policy: &RetryPolicy<E::Kind>,
    subject: &str,
    shutdown: &mut ShutdownListener,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(&RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let max_retries = policy.max_retries();
    let mut ctx = RetryContext::new(subject, max_retries, policy.strategy.name());

    loop {
        ctx.attempt += 1;

        let outcome = tokio::select! {
            biased;
            outcome = operation(&ctx) => outcome,
            _ = shutdown.triggered() => {
                debug!(subject = %ctx.subject, attempt = ctx.attempt, "Shutdown requested, dropping in-flight attempt");
                RetryMetrics::record_attempts("cancelled", ctx.attempt);
                return Err(RetryError::Cancelled {
                    attempts: ctx.attempt,
                    last: None,
                });
            }
        };

        let error = match outcome {
            Ok(value) => {
                if ctx.attempt > 1 {
                    info!(
                        subject = %ctx.subject,
                        attempts = ctx.attempt,
                        "Operation succeeded after retry"
                    );
                }
                RetryMetrics::record_attempts("success", ctx.attempt);
                return Ok(value);
            }
            Err(error) => error,
        };

        let kind = error.kind();
        ctx.last_error = Some(error.to_string());

        if !policy.filter.should_retry(&kind) {
            warn!(
                subject = %ctx.subject,
                attempt = ctx.attempt,
                kind = ?kind,
                error = %error,
                "Failure kind is not retryable"
            );
            RetryMetrics::record_attempts("not_retryable", ctx.attempt);
            return Err(RetryError::NotRetryable {
                attempts: ctx.attempt,
                error,
            });
        }

        if ctx.retries() >= max_retries {
            warn!(
                subject = %ctx.subject,
                attempts = ctx.attempt,
                max_retries,
                strategy = ctx.strategy,
                last_error = ?ctx.last_error,
                "Max retries reached"
            );
            RetryMetrics::record_attempts("exhausted", ctx.attempt);
            return Err(RetryError::Exhausted {
                attempts: ctx.attempt,
                error,
            });
        }

        if shutdown.is_triggered() {
            debug!(subject = %ctx.subject, attempt = ctx.attempt, "Shutdown requested, abandoning retries");
            RetryMetrics::record_attempts("cancelled", ctx.attempt);
            return Err(RetryError::Cancelled {
                attempts: ctx.attempt,
                last: Some(error),
            });
        }

        let delay = policy.strategy.delay(ctx.attempt);
        warn!(
            subject = %ctx.subject,
            retry = ctx.attempt,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            kind = ?kind,
            error = %error,
            "Retry attempt {}/{}",
            ctx.attempt,
            max_retries
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.triggered() => {
                    RetryMetrics::record_attempts("cancelled", ctx.attempt);
                    return Err(RetryError::Cancelled {
                        attempts: ctx.attempt,
                        last: Some(error),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Kind {
        Transient,
        Validation,
    }

    #[derive(Debug)]
    struct TestError(Kind);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?} failure", self.0)
        }
    }

    impl Classify for TestError {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.0
        }
    }

    #[test]
    fn test_interval_schedule_repeats_last() {
        let strategy = RetryStrategy::Intervals(vec![
            Duration::from_millis(10),
            Duration::from_millis(50),
        ]);
        assert_eq!(strategy.delay(1), Duration::from_millis(10));
        assert_eq!(strategy.delay(2), Duration::from_millis(50));
        assert_eq!(strategy.delay(3), Duration::from_millis(50));
        assert_eq!(strategy.delay(9), Duration::from_millis(50));
    }

    #[test]
    fn test_incremental_delay() {
        let strategy = RetryStrategy::Incremental {
            initial: Duration::from_millis(100),
            step: Duration::from_millis(200),
        };
        assert_eq!(strategy.delay(1), Duration::from_millis(100));
        assert_eq!(strategy.delay(2), Duration::from_millis(300));
        assert_eq!(strategy.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let strategy = RetryStrategy::Exponential {
            min: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            factor: 2.0,
        };
        assert_eq!(strategy.delay(1), Duration::from_millis(100));
        assert_eq!(strategy.delay(2), Duration::from_millis(200));
        assert_eq!(strategy.delay(4), Duration::from_millis(800));
        assert_eq!(strategy.delay(5), Duration::from_millis(1000)); // capped
        assert_eq!(strategy.delay(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_filter_deny_wins() {
        let filter = RetryFilter::new(vec![Kind::Validation], vec![Kind::Validation]);
        assert!(!filter.should_retry(&Kind::Validation));
        assert!(!filter.should_retry(&Kind::Transient)); // not in allow-list
    }

    #[test]
    fn test_filter_empty_allow_list_retries_everything_not_denied() {
        let filter = RetryFilter::default().ignore(Kind::Validation);
        assert!(filter.should_retry(&Kind::Transient));
        assert!(!filter.should_retry(&Kind::Validation));
    }

    #[test]
    fn test_none_strategy_ignores_limit() {
        let policy: RetryPolicy<Kind> = RetryPolicy::new(RetryStrategy::None, 10);
        assert_eq!(policy.max_retries(), 0);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::<Kind>::immediate(3);
        let mut listener = Shutdown::new().listener();

        let result = with_retry_policy(&policy, "op", &mut listener, |_ctx| async {
            Ok::<_, TestError>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_immediate_exhausts_after_limit_retries() {
        let policy = RetryPolicy::<Kind>::immediate(3);
        let mut listener = Shutdown::new().listener();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_policy(&policy, "op", &mut listener, move |_ctx| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError(Kind::Transient)) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
        assert_eq!(err.retries(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 4); // Initial + 3 retries
    }

    #[tokio::test]
    async fn test_denied_kind_fails_fast() {
        let policy = RetryPolicy::immediate(5)
            .with_filter(RetryFilter::default().ignore(Kind::Validation));
        let mut listener = Shutdown::new().listener();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_policy(&policy, "op", &mut listener, move |_ctx| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError(Kind::Validation)) }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::NotRetryable { attempts: 1, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::<Kind>::new(
            RetryStrategy::Intervals(vec![Duration::from_millis(5)]),
            3,
        );
        let mut listener = Shutdown::new().listener();

        let result = with_retry_policy(&policy, "op", &mut listener, |ctx| {
            let attempt = ctx.attempt;
            async move {
                if attempt < 3 {
                    Err(TestError(Kind::Transient))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let policy = RetryPolicy::<Kind>::new(
            RetryStrategy::Intervals(vec![Duration::from_secs(30)]),
            3,
        );
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let start = std::time::Instant::now();
        let result = with_retry_policy(&policy, "op", &mut listener, |_ctx| async {
            Err::<(), _>(TestError(Kind::Transient))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1, .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shutdown_drops_in_flight_attempt() {
        let policy = RetryPolicy::<Kind>::immediate(3);
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let start = std::time::Instant::now();
        let result = with_retry_policy(&policy, "op", &mut listener, |_ctx| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, TestError>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Cancelled { attempts: 1, last: None })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
