use crate::config::RelayConfig;
use crate::error::{classify_kafka_error, RelayError, RelayResult};
use async_trait::async_trait;
use event_schema::{Headers, WireMessage};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Sends mapped messages to the downstream broker.
///
/// Implementations should be idempotent; the relay delivers at least once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `message` with `headers` layered underneath the message's own headers.
    ///
    /// Errors are classified with a [`crate::FailureKind`] so the retry filter can decide.
    async fn publish(&self, message: &WireMessage, headers: &Headers) -> RelayResult<()>;
}

/// Headers sent with a message: propagated headers first, the mapper's own on top
pub fn outbound_headers(message: &WireMessage, headers: &Headers) -> Headers {
    let mut merged = headers.clone();
    merged.extend(
        message
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    merged
}

/// Kafka-based implementation of [`MessagePublisher`].
pub struct KafkaPublisher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    /// `producer` should have `enable.idempotence=true` and `acks=all`.
    pub fn new(producer: FutureProducer, delivery_timeout: Duration) -> Self {
        Self {
            producer,
            delivery_timeout,
        }
    }

    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka producer: {}", e);
                RelayError::Kafka(e)
            })?;

        Ok(Self::new(producer, config.publish_timeout()))
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, message: &WireMessage, headers: &Headers) -> RelayResult<()> {
        let merged = outbound_headers(message, headers);

        let mut kafka_headers = OwnedHeaders::new();
        for (key, value) in &merged {
            kafka_headers = kafka_headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            });
        }

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&message.destination)
            .payload(message.payload.as_slice())
            .headers(kafka_headers);
        if let Some(key) = &message.key {
            record = record.key(key.as_slice());
        }

        self.producer
            .send(record, self.delivery_timeout)
            .await
            .map(|_| ())
            .map_err(|(err, _)| {
                RelayError::publish(&message.destination, classify_kafka_error(&err), err)
            })
    }
}

/// Decorator adding timing and structured logs around another publisher
pub struct LoggingPublisher<P> {
    inner: P,
}

impl<P> LoggingPublisher<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: MessagePublisher> MessagePublisher for LoggingPublisher<P> {
    async fn publish(&self, message: &WireMessage, headers: &Headers) -> RelayResult<()> {
        let started = Instant::now();
        let result = self.inner.publish(message, headers).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => debug!(
                destination = %message.destination,
                key = ?message.key_str(),
                bytes = message.payload.len(),
                elapsed_ms,
                "Message published"
            ),
            Err(e) => warn!(
                destination = %message.destination,
                key = ?message.key_str(),
                kind = %e.failure_kind(),
                elapsed_ms,
                error = %e,
                "Publish failed"
            ),
        }

        result
    }
}
