//! Envelope decoder: raw CDC record value to typed [`Envelope`].
//!
//! Accepted value shapes:
//! - the bare outbox row, as emitted by an outbox event router
//! - a Debezium change event (`before`/`after`/`op`), using the `after` image
//! - either of the above inside a `{ "schema": ..., "payload": ... }` wrapper
//!
//! Values framed for a schema registry (magic byte `0x00` followed by a 4-byte big-endian
//! schema id) are unframed first; the id is surfaced as the `X-Schema-Id` header.

use crate::consumer::RawRecord;
use crate::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use event_schema::headers::{self, upstream};
use event_schema::Envelope;
use serde::Deserialize;
use serde_json::Value;

const REGISTRY_MAGIC_BYTE: u8 = 0x00;
const REGISTRY_HEADER_LEN: usize = 5;

/// Result of decoding a non-empty record value
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    /// A change event that carries no new outbox row, e.g. the delete that cleans up a
    /// relayed row. Acknowledged like a tombstone.
    Skip { reason: &'static str },
}

pub trait EnvelopeDecoder: Send + Sync {
    /// Decode the record's value. Failures are [`RelayError::Decode`] and never retried.
    fn decode(&self, record: &RawRecord) -> RelayResult<Decoded>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CdcValue {
    WithSchema {
        #[allow(dead_code)]
        schema: Value,
        payload: Value,
    },
    WithoutSchema(Value),
}

impl CdcValue {
    fn into_inner(self) -> Value {
        match self {
            CdcValue::WithSchema { payload, .. } => payload,
            CdcValue::WithoutSchema(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OutboxRow {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "eventType", alias = "type")]
    event_type: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default, alias = "aggregateType", alias = "aggregatetype")]
    aggregate_type: Option<String>,
    #[serde(default, alias = "aggregateId", alias = "aggregateid")]
    aggregate_id: Option<Value>,
    #[serde(default, alias = "aggregateVersion")]
    aggregate_version: Option<i64>,
    #[serde(default, alias = "correlationId")]
    correlation_id: Option<String>,
    #[serde(default, alias = "causationId")]
    causation_id: Option<String>,
    #[serde(default, alias = "tenantId")]
    tenant_id: Option<String>,
    #[serde(default, alias = "occurredAt", alias = "created_at")]
    occurred_at: Option<Value>,
}

/// JSON decoder for outbox rows
#[derive(Debug, Clone, Default)]
pub struct JsonEnvelopeDecoder;

impl JsonEnvelopeDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl EnvelopeDecoder for JsonEnvelopeDecoder {
    fn decode(&self, record: &RawRecord) -> RelayResult<Decoded> {
        let value = record
            .value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RelayError::Decode("record has no value".into()))?;

        let (schema_id, body) = unframe(value);

        let cdc: CdcValue = serde_json::from_slice(body)
            .map_err(|e| RelayError::Decode(format!("value is not valid JSON: {}", e)))?;

        let row_value = match change_event_image(cdc.into_inner()) {
            Some(row) => row,
            None => {
                return Ok(Decoded::Skip {
                    reason: "change event without an after image",
                })
            }
        };

        let row: OutboxRow = serde_json::from_value(row_value)
            .map_err(|e| RelayError::Decode(format!("value is not an outbox row: {}", e)))?;

        let id = row
            .id
            .as_ref()
            .and_then(scalar_to_string)
            .or_else(|| record.headers.get(upstream::ID).cloned())
            .unwrap_or_default();

        let event_type = row
            .event_type
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                upstream::EVENT_TYPE
                    .iter()
                    .find_map(|name| record.headers.get(*name).cloned())
            })
            .unwrap_or_default();

        let mut builder = Envelope::builder(id, event_type)
            .payload(payload_bytes(row.payload)?)
            .headers(record.headers.clone())
            .aggregate(
                row.aggregate_type.unwrap_or_default(),
                row.aggregate_id
                    .as_ref()
                    .and_then(scalar_to_string)
                    .unwrap_or_default(),
            )
            .aggregate_version(row.aggregate_version);

        if let Some(schema_id) = schema_id {
            builder = builder.header(headers::SCHEMA_ID, schema_id.to_string());
        }
        if let Some(correlation_id) = row.correlation_id {
            builder = builder.correlation_id(correlation_id);
        }
        if let Some(causation_id) = row.causation_id {
            builder = builder.causation_id(causation_id);
        }
        if let Some(tenant_id) = row.tenant_id {
            builder = builder.tenant_id(tenant_id);
        }
        if let Some(occurred_at) = row
            .occurred_at
            .as_ref()
            .and_then(parse_timestamp)
            .or(record.timestamp)
        {
            builder = builder.occurred_at(occurred_at);
        }

        builder
            .build()
            .map(Decoded::Envelope)
            .map_err(|e| RelayError::Decode(e.to_string()))
    }
}

/// Split off registry framing, if present
fn unframe(value: &[u8]) -> (Option<u32>, &[u8]) {
    if value.len() > REGISTRY_HEADER_LEN && value[0] == REGISTRY_MAGIC_BYTE {
        let id = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);
        (Some(id), &value[REGISTRY_HEADER_LEN..])
    } else {
        (None, value)
    }
}

/// For Debezium change events, the row image to relay (`None` when there is none).
/// Other values are returned unchanged.
fn change_event_image(value: Value) -> Option<Value> {
    let is_change_event = value
        .as_object()
        .map_or(false, |o| o.contains_key("op") && o.contains_key("after"));

    if !is_change_event {
        return Some(value);
    }

    match value {
        Value::Object(mut object) => object.remove("after").filter(|after| !after.is_null()),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JSON object/array payloads are re-serialized; string payloads are used verbatim
fn payload_bytes(payload: Option<Value>) -> RelayResult<Vec<u8>> {
    match payload {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.into_bytes()),
        Some(other) => Ok(serde_json::to_vec(&other)?),
    }
}

/// RFC 3339 string or epoch milliseconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}
