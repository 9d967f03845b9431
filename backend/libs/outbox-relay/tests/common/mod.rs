//! Shared in-memory fakes for relay integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use event_schema::{Envelope, Headers, WireMessage};
use outbox_relay::{
    FailureKind, LogConsumer, MapperRegistry, Polled, RawRecord, RecordCoordinates, RelayConfig,
    RelayError, RelayResult, RetryStrategyName,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SOURCE_TOPIC: &str = "orders";
pub const INTEGRATION_TOPIC: &str = "orders.integration-events";
pub const DEAD_LETTER_TOPIC: &str = "orders_error";

type PartitionKey = (String, i32);

#[derive(Default)]
struct LogState {
    partitions: BTreeMap<PartitionKey, Vec<RawRecord>>,
    positions: HashMap<PartitionKey, i64>,
    committed: HashMap<PartitionKey, i64>,
    commit_log: Vec<RecordCoordinates>,
    rewinds: Vec<RecordCoordinates>,
    polls: usize,
    fail_commits: bool,
    fatal: Option<String>,
    reported_fatal: Option<String>,
}

/// Partitioned log with manual commits and seekable read positions
#[derive(Default)]
pub struct InMemoryLog {
    state: Mutex<LogState>,
}

impl InMemoryLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a record and return its offset
    pub fn append(&self, partition: i32, key: Option<&str>, value: Option<Vec<u8>>) -> i64 {
        let mut state = self.state.lock().unwrap();
        let records = state
            .partitions
            .entry((SOURCE_TOPIC.to_string(), partition))
            .or_default();
        let offset = records.len() as i64;

        records.push(RawRecord {
            coordinates: RecordCoordinates::new(SOURCE_TOPIC, partition, offset),
            key: key.map(|k| k.as_bytes().to_vec()),
            value,
            headers: Headers::new(),
            timestamp: None,
        });
        offset
    }

    pub fn append_json(&self, partition: i32, value: Value) -> i64 {
        let key = value["aggregate_id"].as_str().map(str::to_string);
        self.append(
            partition,
            key.as_deref(),
            Some(serde_json::to_vec(&value).unwrap()),
        )
    }

    /// Next offset the group would resume from, if anything was committed
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(&(SOURCE_TOPIC.to_string(), partition))
            .copied()
    }

    pub fn commit_log(&self) -> Vec<RecordCoordinates> {
        self.state.lock().unwrap().commit_log.clone()
    }

    pub fn rewinds(&self) -> Vec<RecordCoordinates> {
        self.state.lock().unwrap().rewinds.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    pub fn fail_commits(&self) {
        self.state.lock().unwrap().fail_commits = true;
    }

    pub fn inject_fatal(&self, reason: &str) {
        self.state.lock().unwrap().fatal = Some(reason.to_string());
    }

    /// Record a fatal error the way a client callback would, without failing polls
    pub fn report_fatal(&self, reason: &str) {
        self.state.lock().unwrap().reported_fatal = Some(reason.to_string());
    }

    fn next_record(&self) -> RelayResult<Polled> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;

        if let Some(reason) = &state.fatal {
            return Err(RelayError::Fatal(reason.clone()));
        }

        let next = state.partitions.iter().find_map(|(key, records)| {
            let position = state.positions.get(key).copied().unwrap_or(0);
            records
                .get(position as usize)
                .map(|record| (key.clone(), record.clone()))
        });

        match next {
            Some((key, record)) => {
                state
                    .positions
                    .insert(key, record.coordinates.offset + 1);
                Ok(Polled::Record(record))
            }
            None => Ok(Polled::Idle),
        }
    }
}

#[async_trait]
impl LogConsumer for InMemoryLog {
    async fn consume_next(&self, timeout: Duration) -> RelayResult<Polled> {
        let polled = self.next_record()?;
        if polled == Polled::Idle {
            // a real broker blocks for the poll timeout when nothing is available
            tokio::time::sleep(timeout).await;
        }
        Ok(polled)
    }

    async fn commit(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(RelayError::Commit {
                topic: coordinates.topic.clone(),
                partition: coordinates.partition,
                offset: coordinates.offset,
                reason: "coordinator not available".into(),
            });
        }

        state.committed.insert(
            (coordinates.topic.clone(), coordinates.partition),
            coordinates.offset + 1,
        );
        state.commit_log.push(coordinates.clone());
        Ok(())
    }

    async fn rewind(&self, coordinates: &RecordCoordinates) -> RelayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.positions.insert(
            (coordinates.topic.clone(), coordinates.partition),
            coordinates.offset,
        );
        state.rewinds.push(coordinates.clone());
        Ok(())
    }

    fn fatal_error(&self) -> Option<RelayError> {
        self.state
            .lock()
            .unwrap()
            .reported_fatal
            .clone()
            .map(RelayError::Fatal)
    }
}

#[derive(Default)]
struct PublisherState {
    attempts: Vec<String>,
    delivered: Vec<(WireMessage, Headers)>,
    next_failures: VecDeque<FailureKind>,
    broken: HashMap<String, FailureKind>,
    stall: Option<Duration>,
}

/// Publisher whose failures are scripted per destination or per call
#[derive(Default)]
pub struct ScriptedPublisher {
    state: Mutex<PublisherState>,
}

impl ScriptedPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` publish calls with `kind`
    pub fn fail_next(&self, count: usize, kind: FailureKind) {
        let mut state = self.state.lock().unwrap();
        state.next_failures.extend(std::iter::repeat(kind).take(count));
    }

    /// Fail every publish to `destination` until [`ScriptedPublisher::heal`]
    pub fn break_destination(&self, destination: &str, kind: FailureKind) {
        self.state
            .lock()
            .unwrap()
            .broken
            .insert(destination.to_string(), kind);
    }

    /// Make every publish take `delay` before it resolves
    pub fn stall(&self, delay: Duration) {
        self.state.lock().unwrap().stall = Some(delay);
    }

    pub fn heal(&self, destination: &str) {
        self.state.lock().unwrap().broken.remove(destination);
    }

    pub fn attempts_to(&self, destination: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|d| d.as_str() == destination)
            .count()
    }

    /// Successfully delivered messages with the headers they were sent with
    pub fn delivered_to(&self, destination: &str) -> Vec<(WireMessage, Headers)> {
        self.state
            .lock()
            .unwrap()
            .delivered
            .iter()
            .filter(|(message, _)| message.destination == destination)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl outbox_relay::MessagePublisher for ScriptedPublisher {
    async fn publish(&self, message: &WireMessage, headers: &Headers) -> RelayResult<()> {
        let stall = self.state.lock().unwrap().stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.attempts.push(message.destination.clone());

        if let Some(kind) = state.broken.get(&message.destination).copied() {
            return Err(RelayError::publish(&message.destination, kind, "scripted outage"));
        }
        if let Some(kind) = state.next_failures.pop_front() {
            return Err(RelayError::publish(&message.destination, kind, "scripted failure"));
        }

        let merged = outbox_relay::publisher::outbound_headers(message, headers);
        state.delivered.push((message.clone(), merged));
        Ok(())
    }
}

pub fn outbox_row(id: &str, event_type: &str, aggregate_id: &str) -> Value {
    json!({
        "id": id,
        "event_type": event_type,
        "aggregate_type": "order",
        "aggregate_id": aggregate_id,
        "correlation_id": format!("corr-{}", id),
        "payload": {"order_id": aggregate_id}
    })
}

fn forward(envelope: &Envelope) -> RelayResult<WireMessage> {
    Ok(
        WireMessage::new(INTEGRATION_TOPIC, envelope.payload().to_vec())
            .with_key(envelope.aggregate_id()),
    )
}

pub fn registry() -> MapperRegistry {
    let mut registry = MapperRegistry::new();
    registry.register_fn("Orders.Created", forward).unwrap();
    registry.register_fn("Orders.Cancelled", forward).unwrap();
    registry
        .register_fn("Orders.Rejected", |envelope| {
            Err(RelayError::Mapping(format!(
                "order {} has no rejection reason",
                envelope.aggregate_id()
            )))
        })
        .unwrap();
    registry
}

/// `Immediate` strategy with three retries; short waits so loops stay fast
pub fn config() -> RelayConfig {
    RelayConfig {
        source_topics: vec![SOURCE_TOPIC.to_string()],
        group_id: "orders-relay".to_string(),
        poll_timeout_ms: 10,
        redelivery_backoff_ms: 10,
        retry_strategy: RetryStrategyName::Immediate,
        retry_limit: 3,
        ..Default::default()
    }
}
