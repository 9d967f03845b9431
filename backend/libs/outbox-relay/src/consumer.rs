//! Consumer core: group subscription, bounded polls, manual commits.

use crate::config::RelayConfig;
use crate::error::{is_fatal_kafka_error, RelayError, RelayResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::Headers;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::{ClientContext, Offset};
use resilience::{with_timeout, Shutdown};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Position of a record in the source log
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordCoordinates {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl RecordCoordinates {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for RecordCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Owned copy of one polled record
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub coordinates: RecordCoordinates,
    pub key: Option<Vec<u8>>,
    /// `None` for tombstones
    pub value: Option<Vec<u8>>,
    /// Header values decoded as UTF-8; invalid sequences are replaced, so only text
    /// headers survive a dead-letter forward byte for byte
    pub headers: Headers,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawRecord {
    /// Absent or empty value
    pub fn is_tombstone(&self) -> bool {
        self.value.as_ref().map_or(true, |v| v.is_empty())
    }
}

/// Outcome of one bounded poll
#[derive(Debug, Clone, PartialEq)]
pub enum Polled {
    Record(RawRecord),
    /// Nothing arrived before the timeout, or a recoverable error was absorbed
    Idle,
    EndOfPartition { partition: i32 },
}

/// Partitioned-log consumer with manual offset management.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Poll for the next record, waiting at most `timeout`.
    ///
    /// Recoverable errors yield [`Polled::Idle`]; fatal errors are returned.
    async fn consume_next(&self, timeout: Duration) -> RelayResult<Polled>;

    /// Commit exactly this record's position
    async fn commit(&self, coordinates: &RecordCoordinates) -> RelayResult<()>;

    /// Move the partition's read position back to `coordinates` so it is polled again
    async fn rewind(&self, coordinates: &RecordCoordinates) -> RelayResult<()>;

    /// Fatal error reported out of band (client callbacks) since the last poll, if any.
    fn fatal_error(&self) -> Option<RelayError> {
        None
    }
}

/// Client context: logs commit results and turns fatal client errors into shutdown.
pub struct RelayConsumerContext {
    shutdown: Shutdown,
    fatal: OnceLock<String>,
}

impl RelayConsumerContext {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            fatal: OnceLock::new(),
        }
    }

    fn record_fatal(&self, reason: String) {
        error!(alert = true, reason = %reason, "Fatal consumer error, requesting shutdown");
        let _ = self.fatal.set(reason);
        self.shutdown.trigger();
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal.get().map(String::as_str)
    }
}

impl ClientContext for RelayConsumerContext {
    fn error(&self, error: KafkaError, reason: &str) {
        if is_fatal_kafka_error(&error) {
            self.record_fatal(format!("{}: {}", error, reason));
        } else {
            warn!(error = %error, reason, "Kafka client error");
        }
    }
}

impl ConsumerContext for RelayConsumerContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => {
                for element in offsets.elements() {
                    debug!(
                        topic = element.topic(),
                        partition = element.partition(),
                        offset = ?element.offset(),
                        "Broker acknowledged commit"
                    );
                }
            }
            Err(e) => warn!(error = %e, partitions = offsets.count(), "Broker rejected commit"),
        }
    }
}

/// Kafka-backed [`LogConsumer`].
///
/// Auto-commit is disabled; offsets move only through [`LogConsumer::commit`].
pub struct KafkaLogConsumer {
    consumer: StreamConsumer<RelayConsumerContext>,
}

impl KafkaLogConsumer {
    /// Join `config.group_id` and subscribe to the configured source topics.
    pub fn subscribe(config: &RelayConfig, shutdown: Shutdown) -> RelayResult<Self> {
        let consumer: StreamConsumer<RelayConsumerContext> = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "true")
            .create_with_context(RelayConsumerContext::new(shutdown))
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                RelayError::Kafka(e)
            })?;

        let topics = config.topics();
        consumer.subscribe(&topics).map_err(|e| {
            error!("Failed to subscribe to topics: {}", e);
            RelayError::Kafka(e)
        })?;

        info!(
            topics = ?topics,
            group_id = %config.group_id,
            "Relay consumer subscribed"
        );

        Ok(Self { consumer })
    }

    pub fn context(&self) -> &RelayConsumerContext {
        self.consumer.context()
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn consume_next(&self, timeout: Duration) -> RelayResult<Polled> {
        if let Some(fatal) = self.fatal_error() {
            return Err(fatal);
        }

        let received = match with_timeout(timeout, self.consumer.recv()).await {
            Ok(received) => received,
            Err(_) => return Ok(Polled::Idle),
        };

        match received {
            Ok(message) => Ok(Polled::Record(to_raw_record(&message))),
            Err(KafkaError::PartitionEOF(partition)) => Ok(Polled::EndOfPartition { partition }),
            Err(err) if is_fatal_kafka_error(&err) => {
                self.consumer.context().record_fatal(err.to_string());
                Err(RelayError::Fatal(err.to_string()))
            }
            Err(err) => {
                warn!(error = %err, "Recoverable consumer error");
                Ok(Polled::Idle)
            }
        }
    }

    async fn commit(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        let commit_error = |reason: String| RelayError::Commit {
            topic: coordinates.topic.clone(),
            partition: coordinates.partition,
            offset: coordinates.offset,
            reason,
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &coordinates.topic,
            coordinates.partition,
            Offset::Offset(coordinates.offset + 1),
        )
        .map_err(|e| commit_error(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| commit_error(e.to_string()))
    }

    async fn rewind(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        self.consumer.seek(
            &coordinates.topic,
            coordinates.partition,
            Offset::Offset(coordinates.offset),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }

    fn fatal_error(&self) -> Option<RelayError> {
        self.context()
            .fatal_reason()
            .map(|reason| RelayError::Fatal(reason.to_string()))
    }
}

fn to_raw_record(message: &BorrowedMessage<'_>) -> RawRecord {
    let mut headers = Headers::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }

    RawRecord {
        coordinates: RecordCoordinates::new(message.topic(), message.partition(), message.offset()),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

/// Decorator adding timing and structured logs around another consumer
pub struct LoggingConsumer<C> {
    inner: C,
}

impl<C> LoggingConsumer<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: LogConsumer> LogConsumer for LoggingConsumer<C> {
    async fn consume_next(&self, timeout: Duration) -> RelayResult<Polled> {
        let started = Instant::now();
        let result = self.inner.consume_next(timeout).await;

        match &result {
            Ok(Polled::Record(record)) => debug!(
                coordinates = %record.coordinates,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Record polled"
            ),
            Ok(Polled::EndOfPartition { partition }) => {
                debug!(partition, "Reached end of partition")
            }
            Ok(Polled::Idle) => {}
            Err(e) => error!(error = %e, "Poll failed"),
        }

        result
    }

    async fn commit(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        let started = Instant::now();
        let result = self.inner.commit(coordinates).await;

        match &result {
            Ok(()) => debug!(
                coordinates = %coordinates,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Offset committed"
            ),
            Err(e) => error!(alert = true, coordinates = %coordinates, error = %e, "Offset commit failed"),
        }

        result
    }

    async fn rewind(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        let result = self.inner.rewind(coordinates).await;
        match &result {
            Ok(()) => info!(coordinates = %coordinates, "Partition rewound for redelivery"),
            Err(e) => error!(coordinates = %coordinates, error = %e, "Rewind failed"),
        }
        result
    }

    fn fatal_error(&self) -> Option<RelayError> {
        self.inner.fatal_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::RDKafkaErrorCode;

    fn record(value: Option<&[u8]>) -> RawRecord {
        RawRecord {
            coordinates: RecordCoordinates::new("orders", 0, 7),
            key: None,
            value: value.map(<[u8]>::to_vec),
            headers: Headers::new(),
            timestamp: None,
        }
    }

    #[test]
    fn test_tombstone_detection() {
        assert!(record(None).is_tombstone());
        assert!(record(Some(b"")).is_tombstone());
        assert!(!record(Some(b"{}")).is_tombstone());
    }

    #[test]
    fn test_coordinates_display() {
        assert_eq!(RecordCoordinates::new("orders", 3, 42).to_string(), "orders[3]@42");
    }

    #[test]
    fn test_context_records_first_fatal_reason() {
        let shutdown = Shutdown::new();
        let context = RelayConsumerContext::new(shutdown.clone());

        context.record_fatal("authentication rejected".into());
        context.record_fatal("second".into());

        assert!(shutdown.is_triggered());
        assert_eq!(context.fatal_reason(), Some("authentication rejected"));
    }

    fn unreachable_broker_config() -> RelayConfig {
        RelayConfig {
            brokers: "127.0.0.1:1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_recorded_fatal_is_reported_before_polling() {
        let shutdown = Shutdown::new();
        let consumer = LoggingConsumer::new(
            KafkaLogConsumer::subscribe(&unreachable_broker_config(), shutdown.clone()).unwrap(),
        );
        assert!(consumer.fatal_error().is_none());

        consumer.inner.context().error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::Authentication),
            "SASL authentication failed",
        );

        assert!(shutdown.is_triggered());
        assert!(matches!(consumer.fatal_error(), Some(RelayError::Fatal(_))));
        let polled = consumer.consume_next(Duration::from_millis(10)).await;
        assert!(matches!(polled, Err(RelayError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_non_fatal_client_error_keeps_running() {
        let shutdown = Shutdown::new();
        let consumer =
            KafkaLogConsumer::subscribe(&unreachable_broker_config(), shutdown.clone()).unwrap();

        consumer.context().error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
            "connection refused",
        );

        assert!(!shutdown.is_triggered());
        assert!(consumer.fatal_error().is_none());
    }
}
