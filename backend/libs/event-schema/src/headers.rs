//! Header names exchanged with the source log and the downstream brokers.

use std::collections::BTreeMap;

/// Header map; ordered so that emitted header sets are deterministic
pub type Headers = BTreeMap<String, String>;

pub const CORRELATION_ID: &str = "CorrelationId";
pub const CAUSATION_ID: &str = "CausationId";

pub const ORIGINAL_OUTBOX_ID: &str = "X-Original-Outbox-Id";
pub const ORIGINAL_EVENT_TYPE: &str = "X-Original-Event-Type";
pub const ORIGINAL_AGGREGATE_TYPE: &str = "X-Original-Aggregate-Type";
pub const ORIGINAL_AGGREGATE_ID: &str = "X-Original-Aggregate-Id";
pub const ORIGINAL_AGGREGATE_VERSION: &str = "X-Original-Aggregate-Version";
pub const ORIGINAL_TENANT_ID: &str = "X-Original-Tenant-Id";

pub const SOURCE_TOPIC: &str = "X-Source-Topic";
pub const SOURCE_PARTITION: &str = "X-Source-Partition";
pub const SOURCE_OFFSET: &str = "X-Source-Offset";
pub const SOURCE_TIMESTAMP: &str = "X-Source-Timestamp";

/// Schema id taken from registry-framed values
pub const SCHEMA_ID: &str = "X-Schema-Id";

pub const DLQ_ID: &str = "X-DLQ-Id";
pub const DLQ_ORIGINAL_TOPIC: &str = "X-DLQ-OriginalTopic";
pub const DLQ_ORIGINAL_PARTITION: &str = "X-DLQ-OriginalPartition";
pub const DLQ_ORIGINAL_OFFSET: &str = "X-DLQ-OriginalOffset";
pub const DLQ_ERROR_REASON: &str = "X-DLQ-ErrorReason";
pub const DLQ_EXCEPTION_TYPE: &str = "X-DLQ-ExceptionType";
pub const DLQ_TIMESTAMP_UTC: &str = "X-DLQ-TimestampUtc";
pub const DLQ_CONSUMER_GROUP: &str = "X-DLQ-ConsumerGroup";

/// Header keys written by upstream outbox routers that carry envelope fields
pub mod upstream {
    pub const ID: &str = "id";
    pub const EVENT_TYPE: [&str; 2] = ["eventType", "event_type"];
}
