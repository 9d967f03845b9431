//! Relay configuration, loaded from `RELAY_`-prefixed environment variables.

use crate::error::{FailureKind, RelayError, RelayResult};
use resilience::{RetryFilter, RetryPolicy, RetryStrategy};
use serde::Deserialize;
use std::time::Duration;

/// Kinds that can never succeed on a second attempt, denied regardless of configuration
const STRUCTURAL_KINDS: [FailureKind; 2] = [
    FailureKind::DecodeError,
    FailureKind::MappingNotFoundError,
];

/// Accepts both `immediate` and `Immediate` spellings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategyName {
    #[serde(alias = "None")]
    None,
    #[serde(alias = "Immediate")]
    Immediate,
    #[serde(alias = "Interval")]
    Interval,
    #[serde(alias = "Incremental")]
    Incremental,
    #[serde(alias = "Exponential")]
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[serde(alias = "Text")]
    Text,
    #[serde(alias = "Json", alias = "JSON")]
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_source_topics")]
    pub source_topics: Vec<String>,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Accepted for parity with registry-aware deployments; framing is stripped locally
    #[serde(default)]
    pub schema_registry_url: Option<String>,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Wait before re-polling a message that could neither be published nor dead-lettered
    #[serde(default = "default_redelivery_backoff_ms")]
    pub redelivery_backoff_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    #[serde(default = "default_retry_strategy")]
    pub retry_strategy: RetryStrategyName,
    /// Retries after the first attempt
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_interval_schedule_ms")]
    pub retry_interval_schedule_ms: Vec<u64>,
    #[serde(default = "default_incremental_initial_ms")]
    pub retry_incremental_initial_ms: u64,
    #[serde(default = "default_incremental_step_ms")]
    pub retry_incremental_step_ms: u64,
    #[serde(default = "default_exponential_min_ms")]
    pub retry_exponential_min_ms: u64,
    #[serde(default = "default_exponential_max_ms")]
    pub retry_exponential_max_ms: u64,
    #[serde(default = "default_exponential_factor")]
    pub retry_exponential_factor: f64,
    /// Allow-list; empty retries every kind not ignored
    #[serde(default)]
    pub retry_handle_kinds: Vec<String>,
    /// Deny-list; wins over the allow-list
    #[serde(default = "default_ignore_kinds")]
    pub retry_ignore_kinds: Vec<String>,

    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_topic_suffix: String,
    #[serde(default = "default_true")]
    pub dead_letter_enabled: bool,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_service_name() -> String {
    "outbox-relay".to_string()
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_source_topics() -> Vec<String> {
    vec!["outbox.events".to_string()]
}

fn default_group_id() -> String {
    "outbox-relay".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_redelivery_backoff_ms() -> u64 {
    5000
}

fn default_publish_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_retry_strategy() -> RetryStrategyName {
    RetryStrategyName::Exponential
}

fn default_retry_limit() -> u32 {
    5
}

fn default_interval_schedule_ms() -> Vec<u64> {
    vec![100, 500, 1000]
}

fn default_incremental_initial_ms() -> u64 {
    100
}

fn default_incremental_step_ms() -> u64 {
    200
}

fn default_exponential_min_ms() -> u64 {
    100
}

fn default_exponential_max_ms() -> u64 {
    10_000
}

fn default_exponential_factor() -> f64 {
    2.0
}

fn default_ignore_kinds() -> Vec<String> {
    vec![
        "ValidationError".to_string(),
        "SerializationError".to_string(),
        "MessageTooLargeError".to_string(),
    ]
}

fn default_dead_letter_suffix() -> String {
    "_error".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            brokers: default_brokers(),
            source_topics: default_source_topics(),
            group_id: default_group_id(),
            schema_registry_url: None,
            poll_timeout_ms: default_poll_timeout_ms(),
            redelivery_backoff_ms: default_redelivery_backoff_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            retry_strategy: default_retry_strategy(),
            retry_limit: default_retry_limit(),
            retry_interval_schedule_ms: default_interval_schedule_ms(),
            retry_incremental_initial_ms: default_incremental_initial_ms(),
            retry_incremental_step_ms: default_incremental_step_ms(),
            retry_exponential_min_ms: default_exponential_min_ms(),
            retry_exponential_max_ms: default_exponential_max_ms(),
            retry_exponential_factor: default_exponential_factor(),
            retry_handle_kinds: Vec::new(),
            retry_ignore_kinds: default_ignore_kinds(),
            dead_letter_topic_suffix: default_dead_letter_suffix(),
            dead_letter_enabled: true,
            log_format: default_log_format(),
        }
    }
}

impl RelayConfig {
    /// Load `.env` (if present) then `RELAY_*` variables, and validate the result.
    pub fn from_env() -> RelayResult<Self> {
        dotenvy::dotenv().ok();

        let config: RelayConfig = envy::prefixed("RELAY_")
            .from_env()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.topics().is_empty() {
            return Err(RelayError::Config(
                "RELAY_SOURCE_TOPICS must name at least one topic".into(),
            ));
        }
        if self.group_id.trim().is_empty() {
            return Err(RelayError::Config("RELAY_GROUP_ID must not be empty".into()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(RelayError::Config(
                "RELAY_POLL_TIMEOUT_MS must be greater than zero".into(),
            ));
        }
        if self.retry_exponential_factor < 1.0 {
            return Err(RelayError::Config(format!(
                "RELAY_RETRY_EXPONENTIAL_FACTOR must be >= 1, got {}",
                self.retry_exponential_factor
            )));
        }
        if self.retry_exponential_min_ms > self.retry_exponential_max_ms {
            return Err(RelayError::Config(format!(
                "RELAY_RETRY_EXPONENTIAL_MIN_MS ({}) exceeds RELAY_RETRY_EXPONENTIAL_MAX_MS ({})",
                self.retry_exponential_min_ms, self.retry_exponential_max_ms
            )));
        }
        if self.retry_strategy == RetryStrategyName::Interval
            && self.retry_interval_schedule_ms.is_empty()
        {
            return Err(RelayError::Config(
                "RELAY_RETRY_INTERVAL_SCHEDULE_MS must not be empty for the interval strategy"
                    .into(),
            ));
        }

        parse_kinds(&self.retry_handle_kinds)?;
        parse_kinds(&self.retry_ignore_kinds)?;
        Ok(())
    }

    /// Source topics with blanks removed
    pub fn topics(&self) -> Vec<&str> {
        self.source_topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        match self.retry_strategy {
            RetryStrategyName::None => RetryStrategy::None,
            RetryStrategyName::Immediate => RetryStrategy::Immediate,
            RetryStrategyName::Interval => RetryStrategy::Intervals(
                self.retry_interval_schedule_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
            ),
            RetryStrategyName::Incremental => RetryStrategy::Incremental {
                initial: Duration::from_millis(self.retry_incremental_initial_ms),
                step: Duration::from_millis(self.retry_incremental_step_ms),
            },
            RetryStrategyName::Exponential => RetryStrategy::Exponential {
                min: Duration::from_millis(self.retry_exponential_min_ms),
                max: Duration::from_millis(self.retry_exponential_max_ms),
                factor: self.retry_exponential_factor,
            },
        }
    }

    /// Typed retry policy; failure-kind names are parsed here, once.
    pub fn retry_policy(&self) -> RelayResult<RetryPolicy<FailureKind>> {
        let handle = parse_kinds(&self.retry_handle_kinds)?;
        let mut ignore = parse_kinds(&self.retry_ignore_kinds)?;
        for kind in STRUCTURAL_KINDS {
            if !ignore.contains(&kind) {
                ignore.push(kind);
            }
        }

        Ok(RetryPolicy::new(self.retry_strategy(), self.retry_limit)
            .with_filter(RetryFilter::new(handle, ignore)))
    }
}

fn parse_kinds(names: &[String]) -> RelayResult<Vec<FailureKind>> {
    names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| name.parse())
        .collect()
}
