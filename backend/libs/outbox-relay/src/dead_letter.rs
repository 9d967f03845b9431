use crate::config::RelayConfig;
use crate::consumer::RawRecord;
use crate::error::{RelayError, RelayResult};
use crate::publisher::MessagePublisher;
use chrono::Utc;
use event_schema::{DeadLetterRecord, Headers};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Forwards poison records to `{OriginalTopic}{suffix}`.
///
/// The forwarder only publishes; committing the original offset is the caller's job and
/// must happen only after [`DeadLetterForwarder::forward`] succeeds.
pub struct DeadLetterForwarder {
    publisher: Arc<dyn MessagePublisher>,
    suffix: String,
    consumer_group: String,
    enabled: bool,
}

impl DeadLetterForwarder {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        suffix: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            suffix: suffix.into(),
            consumer_group: consumer_group.into(),
            enabled: true,
        }
    }

    pub fn from_config(config: &RelayConfig, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self::new(publisher, &config.dead_letter_topic_suffix, &config.group_id)
            .enabled(config.dead_letter_enabled)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn build_record(
        &self,
        record: &RawRecord,
        headers: &Headers,
        failure: &RelayError,
    ) -> DeadLetterRecord {
        DeadLetterRecord {
            id: Uuid::new_v4(),
            original_topic: record.coordinates.topic.clone(),
            original_partition: record.coordinates.partition,
            original_offset: record.coordinates.offset,
            original_key: record.key.clone(),
            original_value: record.value.clone().unwrap_or_default(),
            original_headers: headers.clone(),
            failure_reason: failure.to_string(),
            exception_type: failure.failure_kind().to_string(),
            timestamp_utc: Utc::now(),
            consumer_group: self.consumer_group.clone(),
        }
    }

    /// Publish the dead-letter record for `record`
    pub async fn forward(
        &self,
        record: &RawRecord,
        headers: &Headers,
        failure: &RelayError,
    ) -> RelayResult<DeadLetterRecord> {
        let dead_letter = self.build_record(record, headers, failure);
        let message = dead_letter.to_wire_message(&self.suffix);

        match self.publisher.publish(&message, &Headers::new()).await {
            Ok(()) => {
                info!(
                    dead_letter_id = %dead_letter.id,
                    destination = %message.destination,
                    coordinates = %record.coordinates,
                    exception_type = %dead_letter.exception_type,
                    "Record dead-lettered"
                );
                Ok(dead_letter)
            }
            Err(e) => {
                error!(
                    alert = true,
                    destination = %message.destination,
                    coordinates = %record.coordinates,
                    error = %e,
                    "Dead-letter forward failed"
                );
                Err(RelayError::DeadLetter {
                    destination: message.destination,
                    reason: e.to_string(),
                })
            }
        }
    }
}
