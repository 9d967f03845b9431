//! Decoded outbox envelope.
//!
//! An [`Envelope`] is produced once per CDC record by the relay's decoder and is
//! read-only afterwards: fields are private and only exposed through accessors.

use crate::headers::{self, Headers};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope id is empty")]
    MissingId,

    #[error("envelope event type name is empty")]
    MissingEventType,
}

/// Typed representation of one outbox row relayed through the source log
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    id: String,
    event_type_name: String,
    payload: Vec<u8>,
    headers: Headers,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: Option<i64>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    tenant_id: Option<String>,
    occurred_at_utc: DateTime<Utc>,
}

impl Envelope {
    pub fn builder(id: impl Into<String>, event_type_name: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder {
            id: id.into(),
            event_type_name: event_type_name.into(),
            payload: Vec::new(),
            headers: Headers::new(),
            aggregate_type: String::new(),
            aggregate_id: String::new(),
            aggregate_version: None,
            correlation_id: None,
            causation_id: None,
            tenant_id: None,
            occurred_at_utc: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fully-qualified logical name used for mapper lookup, e.g. `Orders.Created`
    pub fn event_type_name(&self) -> &str {
        &self.event_type_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserialize the payload as JSON into `T`
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_version(&self) -> Option<i64> {
        self.aggregate_version
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn occurred_at_utc(&self) -> DateTime<Utc> {
        self.occurred_at_utc
    }

    /// Envelope fields promoted to outbound headers.
    ///
    /// `CorrelationId` falls back to the envelope id so downstream tracing always has a key.
    pub fn promoted_headers(&self) -> Headers {
        let mut promoted = Headers::new();

        promoted.insert(
            headers::CORRELATION_ID.to_string(),
            self.correlation_id
                .clone()
                .unwrap_or_else(|| self.id.clone()),
        );
        if let Some(causation_id) = &self.causation_id {
            promoted.insert(headers::CAUSATION_ID.to_string(), causation_id.clone());
        }

        promoted.insert(headers::ORIGINAL_OUTBOX_ID.to_string(), self.id.clone());
        promoted.insert(
            headers::ORIGINAL_EVENT_TYPE.to_string(),
            self.event_type_name.clone(),
        );
        promoted.insert(
            headers::ORIGINAL_AGGREGATE_TYPE.to_string(),
            self.aggregate_type.clone(),
        );
        promoted.insert(
            headers::ORIGINAL_AGGREGATE_ID.to_string(),
            self.aggregate_id.clone(),
        );
        if let Some(version) = self.aggregate_version {
            promoted.insert(
                headers::ORIGINAL_AGGREGATE_VERSION.to_string(),
                version.to_string(),
            );
        }
        if let Some(tenant_id) = &self.tenant_id {
            promoted.insert(headers::ORIGINAL_TENANT_ID.to_string(), tenant_id.clone());
        }

        promoted
    }
}

/// Builder for [`Envelope`]; validation happens in [`EnvelopeBuilder::build`]
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    id: String,
    event_type_name: String,
    payload: Vec<u8>,
    headers: Headers,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: Option<i64>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    tenant_id: Option<String>,
    occurred_at_utc: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn aggregate(mut self, aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_type = aggregate_type.into();
        self.aggregate_id = aggregate_id.into();
        self
    }

    pub fn aggregate_version(mut self, version: Option<i64>) -> Self {
        self.aggregate_version = version;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at_utc = Some(occurred_at);
        self
    }

    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        if self.id.trim().is_empty() {
            return Err(EnvelopeError::MissingId);
        }
        if self.event_type_name.trim().is_empty() {
            return Err(EnvelopeError::MissingEventType);
        }

        Ok(Envelope {
            id: self.id,
            event_type_name: self.event_type_name,
            payload: self.payload,
            headers: self.headers,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_version: self.aggregate_version,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            tenant_id: self.tenant_id,
            occurred_at_utc: self.occurred_at_utc.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_rejects_empty_identity() {
        assert_eq!(
            Envelope::builder("", "Orders.Created").build().unwrap_err(),
            EnvelopeError::MissingId
        );
        assert_eq!(
            Envelope::builder("e1", "  ").build().unwrap_err(),
            EnvelopeError::MissingEventType
        );
    }

    #[test]
    fn test_promoted_headers() {
        let envelope = Envelope::builder("e1", "Orders.Created")
            .aggregate("order", "42")
            .aggregate_version(Some(3))
            .causation_id("cmd-9")
            .tenant_id("acme")
            .build()
            .unwrap();

        let promoted = envelope.promoted_headers();
        assert_eq!(promoted[headers::CORRELATION_ID], "e1"); // falls back to id
        assert_eq!(promoted[headers::CAUSATION_ID], "cmd-9");
        assert_eq!(promoted[headers::ORIGINAL_OUTBOX_ID], "e1");
        assert_eq!(promoted[headers::ORIGINAL_AGGREGATE_TYPE], "order");
        assert_eq!(promoted[headers::ORIGINAL_AGGREGATE_ID], "42");
        assert_eq!(promoted[headers::ORIGINAL_AGGREGATE_VERSION], "3");
        assert_eq!(promoted[headers::ORIGINAL_TENANT_ID], "acme");
    }

    #[test]
    fn test_payload_json() {
        let envelope = Envelope::builder("e1", "Orders.Created")
            .payload(serde_json::to_vec(&json!({"order_id": 7})).unwrap())
            .build()
            .unwrap();

        let value: serde_json::Value = envelope.payload_json().unwrap();
        assert_eq!(value["order_id"], 7);
    }
}
