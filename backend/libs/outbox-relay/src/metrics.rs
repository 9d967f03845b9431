use prometheus::{IntCounter, Opts};
use tracing::warn;

/// Monotonic relay counters; the only state shared across the loop besides configuration.
#[derive(Clone)]
pub struct RelayMetrics {
    pub received: IntCounter,
    pub published: IntCounter,
    pub dead_lettered: IntCounter,
    pub tombstones: IntCounter,
    pub decode_failures: IntCounter,
    pub unmapped_events: IntCounter,
    pub publish_retries: IntCounter,
    pub dead_letter_failures: IntCounter,
    pub commit_failures: IntCounter,
    pub pending_redeliveries: IntCounter,
}

fn counter(name: &str, help: &str, service: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help).const_label("service", service.to_string()))
        .expect("valid metric opts for relay counter")
}

impl RelayMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let metrics = Self {
            received: counter(
                "relay_messages_received_total",
                "Records received from the source log",
                service,
            ),
            published: counter(
                "relay_messages_published_total",
                "Mapped messages published downstream and committed",
                service,
            ),
            dead_lettered: counter(
                "relay_messages_dead_lettered_total",
                "Records forwarded to a dead-letter topic and committed",
                service,
            ),
            tombstones: counter(
                "relay_tombstones_total",
                "Tombstone records acknowledged without processing",
                service,
            ),
            decode_failures: counter(
                "relay_decode_failures_total",
                "Records whose value could not be decoded into an envelope",
                service,
            ),
            unmapped_events: counter(
                "relay_unmapped_events_total",
                "Envelopes with no registered mapper",
                service,
            ),
            publish_retries: counter(
                "relay_publish_retries_total",
                "Publish retries performed by the retry policy",
                service,
            ),
            dead_letter_failures: counter(
                "relay_dead_letter_failures_total",
                "Dead-letter forwards that failed, leaving the offset uncommitted",
                service,
            ),
            commit_failures: counter(
                "relay_commit_failures_total",
                "Offset commits rejected by the broker",
                service,
            ),
            pending_redeliveries: counter(
                "relay_pending_redeliveries_total",
                "Records rewound for redelivery",
                service,
            ),
        };

        for metric in [
            Box::new(metrics.received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(metrics.published.clone()),
            Box::new(metrics.dead_lettered.clone()),
            Box::new(metrics.tombstones.clone()),
            Box::new(metrics.decode_failures.clone()),
            Box::new(metrics.unmapped_events.clone()),
            Box::new(metrics.publish_retries.clone()),
            Box::new(metrics.dead_letter_failures.clone()),
            Box::new(metrics.commit_failures.clone()),
            Box::new(metrics.pending_redeliveries.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register relay metric: {}", e);
            }
        }

        metrics
    }
}
