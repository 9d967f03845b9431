//! Error types for the outbox relay.

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use resilience::Classify;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Closed set of failure classifications.
///
/// Every error is classified exactly once, at the boundary where it is produced, and the
/// retry filter and dead-letter diagnostics only ever see the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    TransientError,
    TimeoutError,
    BrokerUnavailableError,
    MessageTooLargeError,
    ValidationError,
    SerializationError,
    AuthorizationError,
    DecodeError,
    MappingNotFoundError,
    Unknown,
}

impl FailureKind {
    pub const ALL: [FailureKind; 10] = [
        FailureKind::TransientError,
        FailureKind::TimeoutError,
        FailureKind::BrokerUnavailableError,
        FailureKind::MessageTooLargeError,
        FailureKind::ValidationError,
        FailureKind::SerializationError,
        FailureKind::AuthorizationError,
        FailureKind::DecodeError,
        FailureKind::MappingNotFoundError,
        FailureKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransientError => "TransientError",
            FailureKind::TimeoutError => "TimeoutError",
            FailureKind::BrokerUnavailableError => "BrokerUnavailableError",
            FailureKind::MessageTooLargeError => "MessageTooLargeError",
            FailureKind::ValidationError => "ValidationError",
            FailureKind::SerializationError => "SerializationError",
            FailureKind::AuthorizationError => "AuthorizationError",
            FailureKind::DecodeError => "DecodeError",
            FailureKind::MappingNotFoundError => "MappingNotFoundError",
            FailureKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| RelayError::Config(format!("unknown failure kind '{}'", name)))
    }
}

/// Errors that can occur while relaying outbox events.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Unrecoverable consumer failure; terminates the relay
    #[error("Fatal consumer error: {0}")]
    Fatal(String),

    /// Offset commit failed; never retried
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// Record value could not be decoded into an envelope
    #[error("Envelope decode failed: {0}")]
    Decode(String),

    /// No mapper registered for the envelope's event type
    #[error("No mapper registered for event type '{0}'")]
    MappingNotFound(String),

    /// Mapper rejected the envelope payload
    #[error("Mapping failed: {0}")]
    Mapping(String),

    /// Downstream publish failed
    #[error("Publish to '{destination}' failed ({kind}): {reason}")]
    Publish {
        destination: String,
        kind: FailureKind,
        reason: String,
    },

    /// Dead-letter forward failed; the original offset stays uncommitted
    #[error("Dead-letter forward to '{destination}' failed: {reason}")]
    DeadLetter { destination: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    pub fn publish(destination: impl Into<String>, kind: FailureKind, reason: impl fmt::Display) -> Self {
        RelayError::Publish {
            destination: destination.into(),
            kind,
            reason: reason.to_string(),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RelayError::Decode(_) => FailureKind::DecodeError,
            RelayError::MappingNotFound(_) => FailureKind::MappingNotFoundError,
            RelayError::Mapping(_) | RelayError::Config(_) => FailureKind::ValidationError,
            RelayError::Publish { kind, .. } => *kind,
            RelayError::Serialization(_) => FailureKind::SerializationError,
            RelayError::Kafka(err) => classify_kafka_error(err),
            RelayError::DeadLetter { .. } => FailureKind::TransientError,
            RelayError::Fatal(_) | RelayError::Commit { .. } => FailureKind::Unknown,
        }
    }

    /// Errors that escape the message loop and stop the relay
    pub fn is_fatal(&self) -> bool {
        match self {
            RelayError::Fatal(_) | RelayError::Commit { .. } => true,
            RelayError::Kafka(err) => is_fatal_kafka_error(err),
            _ => false,
        }
    }
}

impl Classify for RelayError {
    type Kind = FailureKind;

    fn kind(&self) -> FailureKind {
        self.failure_kind()
    }
}

/// Map a broker client error to a failure kind
pub fn classify_kafka_error(err: &KafkaError) -> FailureKind {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::MessageBatchTooLarge,
        ) => FailureKind::MessageTooLargeError,
        Some(
            RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::OperationTimedOut,
        ) => FailureKind::TimeoutError,
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerNotAvailable
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::NetworkException,
        ) => FailureKind::BrokerUnavailableError,
        Some(
            RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => FailureKind::AuthorizationError,
        Some(RDKafkaErrorCode::KeySerialization | RDKafkaErrorCode::ValueSerialization) => {
            FailureKind::SerializationError
        }
        Some(RDKafkaErrorCode::QueueFull | RDKafkaErrorCode::NotEnoughReplicas) => {
            FailureKind::TransientError
        }
        Some(_) => FailureKind::Unknown,
        None => match err {
            KafkaError::Canceled => FailureKind::TransientError,
            _ => FailureKind::Unknown,
        },
    }
}

/// Authentication rejection, protocol mismatch and lost group membership cannot be polled
/// through and stop the relay.
pub fn is_fatal_kafka_error(err: &KafkaError) -> bool {
    if matches!(err, KafkaError::MessageConsumptionFatal(_)) {
        return true;
    }
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::UnsupportedVersion
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
                | RDKafkaErrorCode::InconsistentGroupProtocol
                | RDKafkaErrorCode::FencedInstanceId
                | RDKafkaErrorCode::Fatal
        )
    )
}
