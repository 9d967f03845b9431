use chrono::{DateTime, Utc};
/// Event schemas shared by the outbox relay and the services that consume its output
///
/// This library defines:
/// - the decoded outbox [`Envelope`] the relay works with,
/// - the outbound [`WireMessage`] produced by event mappers,
/// - the [`DeadLetterRecord`] written for poison messages,
/// - the header names exchanged with upstream and downstream brokers,
/// - the versioned integration envelope and the order domain events.
use serde::{Deserialize, Serialize};

pub mod dead_letter;
pub mod envelope;
pub mod headers;
pub mod orders;
pub mod wire;

// Re-export commonly used types
pub use dead_letter::DeadLetterRecord;
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeError};
pub use headers::Headers;
pub use wire::WireMessage;

/// Current schema version for integration events
pub const SCHEMA_VERSION: u32 = 1;

/// Versioned envelope wrapped around every integration event the relay emits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationEnvelope<T> {
    /// Outbox id of the originating event, reused for downstream idempotency
    pub event_id: String,
    /// Logical event type, e.g. `order.created`
    pub event_type: String,
    /// When the change happened in the source system
    pub timestamp: DateTime<Utc>,
    /// Schema version for compatibility checking
    pub schema_version: u32,
    /// Service that produced the change
    pub source: String,
    /// Correlation ID for distributed tracing
    pub correlation_id: Option<String>,
    /// Actual event payload
    pub data: T,
}

impl<T> IntegrationEnvelope<T> {
    /// Build an integration envelope carrying the identity and timing of `origin`.
    pub fn from_origin(origin: &Envelope, event_type: impl Into<String>, data: T) -> Self {
        Self {
            event_id: origin.id().to_string(),
            event_type: event_type.into(),
            timestamp: origin.occurred_at_utc(),
            schema_version: SCHEMA_VERSION,
            source: origin.aggregate_type().to_string(),
            correlation_id: origin.correlation_id().map(str::to_string),
            data,
        }
    }
}

pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    // Exact match until a second schema version exists
    current_version == message_version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_envelope_from_origin() {
        let origin = Envelope::builder("e1", "Orders.Created")
            .aggregate("order", "42")
            .correlation_id("corr-1")
            .payload(b"{}".to_vec())
            .build()
            .unwrap();

        let envelope = IntegrationEnvelope::from_origin(&origin, "order.created", 7u32);
        assert_eq!(envelope.event_id, "e1");
        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert_eq!(envelope.source, "order");
        assert_eq!(envelope.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(envelope.timestamp, origin.occurred_at_utc());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible(SCHEMA_VERSION, SCHEMA_VERSION));
        assert!(!is_compatible(1, 2));
    }
}
