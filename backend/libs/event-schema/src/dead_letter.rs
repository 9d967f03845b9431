//! Dead-letter record format.
//!
//! The payload of a dead-letter message is the untouched original record value so it
//! can be replayed as-is; every diagnostic travels in `X-DLQ-*` headers.

use crate::headers::{self, Headers};
use crate::wire::WireMessage;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRecord {
    /// Unique id of this dead-letter entry
    pub id: Uuid,
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub original_key: Option<Vec<u8>>,
    /// Original record value, byte for byte
    pub original_value: Vec<u8>,
    /// Original record headers plus promoted envelope fields when decoding succeeded
    pub original_headers: Headers,
    pub failure_reason: String,
    /// Failure classification, e.g. `DecodeError`
    pub exception_type: String,
    pub timestamp_utc: DateTime<Utc>,
    pub consumer_group: String,
}

impl DeadLetterRecord {
    /// `{OriginalTopic}{suffix}`, e.g. `orders` + `_error` = `orders_error`
    pub fn destination(&self, suffix: &str) -> String {
        format!("{}{}", self.original_topic, suffix)
    }

    /// Diagnostic headers layered over the original headers
    pub fn diagnostic_headers(&self) -> Headers {
        let mut diagnostics = Headers::new();
        diagnostics.insert(headers::DLQ_ID.to_string(), self.id.to_string());
        diagnostics.insert(
            headers::DLQ_ORIGINAL_TOPIC.to_string(),
            self.original_topic.clone(),
        );
        diagnostics.insert(
            headers::DLQ_ORIGINAL_PARTITION.to_string(),
            self.original_partition.to_string(),
        );
        diagnostics.insert(
            headers::DLQ_ORIGINAL_OFFSET.to_string(),
            self.original_offset.to_string(),
        );
        diagnostics.insert(
            headers::DLQ_ERROR_REASON.to_string(),
            self.failure_reason.clone(),
        );
        diagnostics.insert(
            headers::DLQ_EXCEPTION_TYPE.to_string(),
            self.exception_type.clone(),
        );
        diagnostics.insert(
            headers::DLQ_TIMESTAMP_UTC.to_string(),
            self.timestamp_utc.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        diagnostics.insert(
            headers::DLQ_CONSUMER_GROUP.to_string(),
            self.consumer_group.clone(),
        );
        diagnostics
    }

    pub fn to_wire_message(&self, suffix: &str) -> WireMessage {
        let mut headers = self.original_headers.clone();
        headers.extend(self.diagnostic_headers());

        WireMessage {
            destination: self.destination(suffix),
            key: self.original_key.clone(),
            payload: self.original_value.clone(),
            headers,
        }
    }
}
