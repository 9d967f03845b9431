//! # Outbox Change-Event Relay
//!
//! Relays change-data-capture records of an application's transactional outbox table to
//! downstream topics.
//!
//! For every record the relay:
//! 1. decodes the CDC value into a typed [`Envelope`](event_schema::Envelope)
//! 2. maps it with the mapper registered for its event type
//! 3. publishes the mapped message, retrying per the configured [`RetryPolicy`](resilience::RetryPolicy)
//! 4. commits the record's offset
//!
//! A record that cannot be published (undecodable, unmapped, non-retryable or out of
//! retries) is forwarded to `{topic}{suffix}` and committed only once that forward
//! succeeds. If the forward fails the partition is rewound and the record is retried
//! later, so no offset is ever committed for unresolved work.
//!
//! ## Guarantees
//!
//! - **At-least-once**: an offset is committed only after a successful publish or a
//!   successful dead-letter forward
//! - **Per-partition ordering**: records are processed one at a time, in poll order
//! - **No exactly-once**: downstream consumers must tolerate duplicates
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use outbox_relay::{
//!     KafkaLogConsumer, KafkaPublisher, MapperRegistry, OutboxRelay, RelayConfig,
//! };
//! use event_schema::WireMessage;
//! use resilience::Shutdown;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::from_env()?;
//!     let shutdown = Shutdown::new();
//!
//!     let mut registry = MapperRegistry::new();
//!     registry.register_fn("Orders.Created", |envelope| {
//!         Ok(WireMessage::new("orders.integration-events", envelope.payload().to_vec())
//!             .with_key(envelope.aggregate_id()))
//!     })?;
//!
//!     let consumer = Arc::new(KafkaLogConsumer::subscribe(&config, shutdown.clone())?);
//!     let publisher = Arc::new(KafkaPublisher::from_config(&config)?);
//!
//!     let relay = OutboxRelay::new(&config, consumer, publisher, registry, shutdown)?;
//!     relay.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod decoder;
mod error;
pub mod mapper;
pub mod metrics;
pub mod publisher;
pub mod relay;
pub mod source;

pub use config::{LogFormat, RelayConfig, RetryStrategyName};
pub use consumer::{
    KafkaLogConsumer, LogConsumer, LoggingConsumer, Polled, RawRecord, RecordCoordinates,
};
pub use dead_letter::DeadLetterForwarder;
pub use decoder::{Decoded, EnvelopeDecoder, JsonEnvelopeDecoder};
pub use error::{classify_kafka_error, is_fatal_kafka_error, FailureKind, RelayError, RelayResult};
pub use mapper::{EventMapper, MapperRegistry};
pub use metrics::RelayMetrics;
pub use publisher::{KafkaPublisher, LoggingPublisher, MessagePublisher};
pub use relay::OutboxRelay;
pub use source::{ConsumedMessage, Disposition, MessageSource, Next};
