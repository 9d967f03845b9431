//! Message source adapter.
//!
//! Wraps the consumer core and the decoder. Tombstones, end-of-partition signals and
//! undecodable records are absorbed here; everything else is handed out as a
//! [`ConsumedMessage`] that must be resolved exactly once.

use crate::consumer::{LogConsumer, Polled, RawRecord, RecordCoordinates};
use crate::dead_letter::DeadLetterForwarder;
use crate::decoder::{Decoded, EnvelopeDecoder};
use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayMetrics;
use chrono::SecondsFormat;
use event_schema::headers;
use event_schema::{Envelope, Headers};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How a received record was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Published downstream, offset committed
    Committed,
    /// Tombstone or empty change event, offset committed without processing
    Skipped,
    /// Forwarded to the dead-letter topic, offset committed
    DeadLettered,
    /// Neither published nor dead-lettered; partition rewound to this offset
    PendingRedelivery,
    /// Shutdown interrupted processing; nothing committed
    Abandoned,
}

/// Result of one receive call
#[derive(Debug)]
pub enum Next {
    Message(ConsumedMessage),
    /// Resolved inside the source
    Handled(Disposition),
    /// Poll timed out or hit end of partition
    Idle,
}

/// Commit and dead-letter continuations shared by every consumed message
#[derive(Clone)]
struct Settlement {
    consumer: Arc<dyn LogConsumer>,
    forwarder: Arc<DeadLetterForwarder>,
    metrics: RelayMetrics,
}

impl Settlement {
    async fn commit(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        self.consumer.commit(coordinates).await.map_err(|e| {
            self.metrics.commit_failures.inc();
            error!(alert = true, coordinates = %coordinates, error = %e, "Offset commit failed");
            e
        })
    }

    /// Dead-letter `record`, then commit. Without a successful forward nothing is
    /// committed and the partition is rewound.
    async fn dead_letter(
        &self,
        record: &RawRecord,
        headers: &Headers,
        failure: &RelayError,
    ) -> RelayResult<Disposition> {
        let coordinates = &record.coordinates;

        if !self.forwarder.is_enabled() {
            error!(
                alert = true,
                coordinates = %coordinates,
                error = %failure,
                "Dead-lettering disabled, leaving record pending"
            );
            return self.redeliver(coordinates).await;
        }

        match self.forwarder.forward(record, headers, failure).await {
            Ok(_) => {
                self.commit(coordinates).await?;
                self.metrics.dead_lettered.inc();
                Ok(Disposition::DeadLettered)
            }
            Err(_) => {
                self.metrics.dead_letter_failures.inc();
                self.redeliver(coordinates).await
            }
        }
    }

    /// Rewind so the record is polled again. If the rewind itself fails a later offset
    /// could be committed past this one, so the relay must stop.
    async fn redeliver(&self, coordinates: &RecordCoordinates) -> RelayResult<Disposition> {
        self.consumer.rewind(coordinates).await.map_err(|e| {
            RelayError::Fatal(format!(
                "cannot rewind {} for redelivery: {}",
                coordinates, e
            ))
        })?;
        self.metrics.pending_redeliveries.inc();
        Ok(Disposition::PendingRedelivery)
    }
}

/// A decoded record awaiting resolution.
///
/// Exactly one of [`acknowledge`](Self::acknowledge), [`fail`](Self::fail) or
/// [`abandon`](Self::abandon) must be called. Dropping an unresolved message is a
/// liveness defect and is logged as such.
pub struct ConsumedMessage {
    envelope: Envelope,
    record: RawRecord,
    headers: Headers,
    settlement: Option<Settlement>,
}

impl std::fmt::Debug for ConsumedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedMessage")
            .field("coordinates", &self.record.coordinates)
            .field("event_type", &self.envelope.event_type_name())
            .field("resolved", &self.settlement.is_none())
            .finish()
    }
}

impl ConsumedMessage {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn coordinates(&self) -> &RecordCoordinates {
        &self.record.coordinates
    }

    /// Outbound headers: wire headers, promoted envelope fields and source coordinates
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Commit this message's offset
    pub async fn acknowledge(mut self) -> RelayResult<()> {
        match self.settlement.take() {
            Some(settlement) => settlement.commit(&self.record.coordinates).await,
            None => Ok(()),
        }
    }

    /// Dead-letter this message with `failure` as the reason, committing only once the
    /// forward succeeds
    pub async fn fail(mut self, failure: &RelayError) -> RelayResult<Disposition> {
        match self.settlement.take() {
            Some(settlement) => {
                settlement
                    .dead_letter(&self.record, &self.headers, failure)
                    .await
            }
            None => Ok(Disposition::Abandoned),
        }
    }

    /// Release the message without committing; it will be redelivered after restart or
    /// rebalance
    pub fn abandon(mut self) {
        if self.settlement.take().is_some() {
            debug!(coordinates = %self.record.coordinates, "Message abandoned without commit");
        }
    }
}

impl Drop for ConsumedMessage {
    fn drop(&mut self) {
        if self.settlement.is_some() {
            error!(
                alert = true,
                coordinates = %self.record.coordinates,
                event_type = %self.envelope.event_type_name(),
                "Consumed message dropped without acknowledge, fail or abandon"
            );
        }
    }
}

pub struct MessageSource {
    consumer: Arc<dyn LogConsumer>,
    decoder: Arc<dyn EnvelopeDecoder>,
    settlement: Settlement,
}

impl MessageSource {
    pub fn new(
        consumer: Arc<dyn LogConsumer>,
        decoder: Arc<dyn EnvelopeDecoder>,
        forwarder: Arc<DeadLetterForwarder>,
        metrics: RelayMetrics,
    ) -> Self {
        Self {
            settlement: Settlement {
                consumer: consumer.clone(),
                forwarder,
                metrics,
            },
            consumer,
            decoder,
        }
    }

    /// Fatal error the consumer recorded outside a poll, e.g. from a client callback
    pub fn fatal_error(&self) -> Option<RelayError> {
        self.consumer.fatal_error()
    }

    /// Poll once and normalize the result.
    ///
    /// Only fatal consumer errors, commit failures and failed rewinds are returned as `Err`.
    pub async fn receive(&self, timeout: Duration) -> RelayResult<Next> {
        let record = match self.consumer.consume_next(timeout).await? {
            Polled::Record(record) => record,
            Polled::Idle | Polled::EndOfPartition { .. } => return Ok(Next::Idle),
        };

        let metrics = &self.settlement.metrics;
        metrics.received.inc();

        if record.is_tombstone() {
            debug!(coordinates = %record.coordinates, "Tombstone acknowledged");
            self.settlement.commit(&record.coordinates).await?;
            metrics.tombstones.inc();
            return Ok(Next::Handled(Disposition::Skipped));
        }

        match self.decoder.decode(&record) {
            Ok(Decoded::Envelope(envelope)) => {
                let headers = message_headers(&envelope, &record);
                Ok(Next::Message(ConsumedMessage {
                    envelope,
                    record,
                    headers,
                    settlement: Some(self.settlement.clone()),
                }))
            }
            Ok(Decoded::Skip { reason }) => {
                debug!(coordinates = %record.coordinates, reason, "Change event skipped");
                self.settlement.commit(&record.coordinates).await?;
                metrics.tombstones.inc();
                Ok(Next::Handled(Disposition::Skipped))
            }
            Err(failure) => {
                metrics.decode_failures.inc();
                warn!(
                    coordinates = %record.coordinates,
                    error = %failure,
                    "Record could not be decoded, dead-lettering"
                );
                let disposition = self
                    .settlement
                    .dead_letter(&record, &record.headers, &failure)
                    .await?;
                Ok(Next::Handled(disposition))
            }
        }
    }
}

/// Wire headers, then promoted envelope fields, then source coordinates
fn message_headers(envelope: &Envelope, record: &RawRecord) -> Headers {
    let mut merged = envelope.headers().clone();
    merged.extend(envelope.promoted_headers());

    let coordinates = &record.coordinates;
    merged.insert(headers::SOURCE_TOPIC.to_string(), coordinates.topic.clone());
    merged.insert(
        headers::SOURCE_PARTITION.to_string(),
        coordinates.partition.to_string(),
    );
    merged.insert(
        headers::SOURCE_OFFSET.to_string(),
        coordinates.offset.to_string(),
    );
    if let Some(timestamp) = record.timestamp {
        merged.insert(
            headers::SOURCE_TIMESTAMP.to_string(),
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    merged
}
