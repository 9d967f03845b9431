/// Integration tests for resilience library
use resilience::{
    with_retry_policy, with_timeout, Classify, RetryError, RetryFilter, RetryPolicy,
    RetryStrategy, Shutdown, ShutdownListener, TimeoutError,
};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    BrokerUnavailable,
    Validation,
}

#[derive(Debug)]
struct Failure(Kind);

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Classify for Failure {
    type Kind = Kind;

    fn kind(&self) -> Kind {
        self.0
    }
}

async fn run_failing(
    policy: &RetryPolicy<Kind>,
    listener: &mut ShutdownListener,
    kind: Kind,
    calls: Arc<AtomicU32>,
) -> Result<(), RetryError<Failure>> {
    with_retry_policy(policy, "orders[0]@7", listener, |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Failure(kind))
        }
    })
    .await
}

// ==================== Retry Policy Tests ====================

#[tokio::test]
async fn test_interval_schedule_repeats_last_interval() {
    let policy = RetryPolicy::new(
        RetryStrategy::Intervals(vec![Duration::from_millis(10), Duration::from_millis(20)]),
        3,
    );
    let calls = Arc::new(AtomicU32::new(0));
    let mut listener = ShutdownListener::never();

    let started = Instant::now();
    let result = run_failing(&policy, &mut listener, Kind::BrokerUnavailable, calls.clone()).await;

    // 10ms + 20ms + 20ms between the four attempts
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    match result {
        Err(RetryError::Exhausted { attempts, error }) => {
            assert_eq!(attempts, 4);
            assert_eq!(error.0, Kind::BrokerUnavailable);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_none_strategy_ignores_limit() {
    let policy = RetryPolicy::new(RetryStrategy::None, 5);
    let calls = Arc::new(AtomicU32::new(0));
    let mut listener = ShutdownListener::never();

    let result = run_failing(&policy, &mut listener, Kind::BrokerUnavailable, calls.clone()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.unwrap_err().retries(), 0);
}

#[tokio::test]
async fn test_allow_list_limits_retried_kinds() {
    let policy = RetryPolicy::immediate(3)
        .with_filter(RetryFilter::default().handle(Kind::BrokerUnavailable));
    let calls = Arc::new(AtomicU32::new(0));
    let mut listener = ShutdownListener::never();

    let result = run_failing(&policy, &mut listener, Kind::Validation, calls.clone()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        result,
        Err(RetryError::NotRetryable { attempts: 1, .. })
    ));
}

#[tokio::test]
async fn test_deny_list_wins_over_allow_list() {
    let filter = RetryFilter::new(vec![Kind::Validation], vec![Kind::Validation]);
    let policy = RetryPolicy::immediate(3).with_filter(filter);
    let calls = Arc::new(AtomicU32::new(0));
    let mut listener = ShutdownListener::never();

    let result = run_failing(&policy, &mut listener, Kind::Validation, calls.clone()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(RetryError::NotRetryable { .. })));
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let policy = RetryPolicy::new(
        RetryStrategy::Incremental {
            initial: Duration::from_millis(1),
            step: Duration::from_millis(1),
        },
        5,
    );
    let calls = Arc::new(AtomicU32::new(0));
    let mut listener = ShutdownListener::never();

    let result = with_retry_policy(&policy, "orders[1]@3", &mut listener, |ctx| {
        let calls = calls.clone();
        let attempt = ctx.attempt;
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                Err(Failure(Kind::BrokerUnavailable))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_exponential_delays_are_capped() {
    let strategy = RetryStrategy::Exponential {
        min: Duration::from_millis(100),
        max: Duration::from_millis(1000),
        factor: 3.0,
    };

    let delays: Vec<_> = (1..=4).map(|retry| strategy.delay(retry)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(300),
            Duration::from_millis(900),
            Duration::from_millis(1000),
        ]
    );
}

// ==================== Shutdown Tests ====================

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let policy = RetryPolicy::new(RetryStrategy::Intervals(vec![Duration::from_secs(30)]), 5);
    let shutdown = Shutdown::new();
    let mut listener = shutdown.listener();
    let calls = Arc::new(AtomicU32::new(0));

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    let result = run_failing(&policy, &mut listener, Kind::BrokerUnavailable, calls.clone()).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match result {
        Err(RetryError::Cancelled { attempts, last }) => {
            assert_eq!(attempts, 1);
            assert!(last.is_some());
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_cancels_slow_attempt() {
    let policy = RetryPolicy::<Kind>::immediate(3);
    let shutdown = Shutdown::new();
    let mut listener = shutdown.listener();
    let finished = Arc::new(AtomicU32::new(0));

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    let result = with_retry_policy(&policy, "orders[2]@9", &mut listener, |_ctx| {
        let finished = finished.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Failure>(())
        }
    })
    .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(finished.load(Ordering::SeqCst), 0);
    match result {
        Err(RetryError::Cancelled { attempts, last }) => {
            assert_eq!(attempts, 1);
            assert!(last.is_none());
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_triggered_shutdown_stops_immediate_retries() {
    let policy = RetryPolicy::immediate(10);
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut listener = shutdown.listener();
    let calls = Arc::new(AtomicU32::new(0));

    let result = run_failing(&policy, &mut listener, Kind::BrokerUnavailable, calls.clone()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result.unwrap_err().is_cancelled());
}

// ==================== Timeout Tests ====================

#[tokio::test]
async fn test_timeout_completes_in_time() {
    let result = with_timeout(Duration::from_millis(100), async { 42 }).await;
    assert_eq!(result.unwrap(), 42);
}

#[tokio::test]
async fn test_timeout_elapses() {
    let result = with_timeout(
        Duration::from_millis(10),
        tokio::time::sleep(Duration::from_secs(5)),
    )
    .await;

    assert!(matches!(result, Err(TimeoutError::Elapsed(d)) if d == Duration::from_millis(10)));
}

#[test]
fn test_listener_wakes_on_trigger() {
    let shutdown = Shutdown::new();
    let mut listener = shutdown.listener();
    let mut waiting = tokio_test::task::spawn(async move { listener.triggered().await });

    tokio_test::assert_pending!(waiting.poll());

    shutdown.trigger();
    assert!(waiting.is_woken());
    tokio_test::assert_ready!(waiting.poll());
}
