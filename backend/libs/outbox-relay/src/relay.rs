//! The relay loop: poll, map, publish, then acknowledge.
//!
//! One loop owns the whole assigned partition set and processes strictly sequentially,
//! so message N+1 is never looked at before message N is resolved.

use crate::config::RelayConfig;
use crate::consumer::LogConsumer;
use crate::dead_letter::DeadLetterForwarder;
use crate::decoder::{EnvelopeDecoder, JsonEnvelopeDecoder};
use crate::error::{FailureKind, RelayResult};
use crate::mapper::MapperRegistry;
use crate::metrics::RelayMetrics;
use crate::publisher::MessagePublisher;
use crate::source::{ConsumedMessage, Disposition, MessageSource, Next};
use resilience::{with_retry_policy, RetryContext, RetryError, RetryPolicy, Shutdown, ShutdownListener};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct OutboxRelay {
    source: MessageSource,
    registry: MapperRegistry,
    publisher: Arc<dyn MessagePublisher>,
    policy: RetryPolicy<FailureKind>,
    metrics: RelayMetrics,
    shutdown: Shutdown,
    poll_timeout: Duration,
    redelivery_backoff: Duration,
}

impl OutboxRelay {
    pub fn new(
        config: &RelayConfig,
        consumer: Arc<dyn LogConsumer>,
        publisher: Arc<dyn MessagePublisher>,
        registry: MapperRegistry,
        shutdown: Shutdown,
    ) -> RelayResult<Self> {
        Self::with_decoder(
            config,
            consumer,
            Arc::new(JsonEnvelopeDecoder::new()),
            publisher,
            registry,
            shutdown,
        )
    }

    pub fn with_decoder(
        config: &RelayConfig,
        consumer: Arc<dyn LogConsumer>,
        decoder: Arc<dyn EnvelopeDecoder>,
        publisher: Arc<dyn MessagePublisher>,
        registry: MapperRegistry,
        shutdown: Shutdown,
    ) -> RelayResult<Self> {
        config.validate()?;

        let metrics = RelayMetrics::new(&config.service_name);
        let forwarder = Arc::new(DeadLetterForwarder::from_config(config, publisher.clone()));

        Ok(Self {
            source: MessageSource::new(consumer, decoder, forwarder, metrics.clone()),
            registry,
            publisher,
            policy: config.retry_policy()?,
            metrics,
            shutdown,
            poll_timeout: config.poll_timeout(),
            redelivery_backoff: config.redelivery_backoff(),
        })
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// Only fatal consumer errors, commit failures and failed rewinds are returned.
    pub async fn run(&self) -> RelayResult<()> {
        let mut shutdown = self.shutdown.listener();

        info!(
            mappers = ?self.registry.event_types(),
            strategy = self.policy.strategy.name(),
            max_retries = self.policy.max_retries(),
            "Outbox relay started"
        );

        loop {
            if shutdown.is_triggered() {
                // client callbacks trigger shutdown on fatal errors; those must not exit cleanly
                if let Some(e) = self.source.fatal_error() {
                    error!(alert = true, error = %e, "Outbox relay stopping on fatal error");
                    return Err(e);
                }
                info!("Shutdown requested, stopping outbox relay");
                return Ok(());
            }

            match self.poll_once(&mut shutdown).await {
                Ok(Some(Disposition::PendingRedelivery)) => {
                    debug!(
                        backoff_ms = self.redelivery_backoff.as_millis() as u64,
                        "Waiting before redelivery"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.redelivery_backoff) => {}
                        _ = shutdown.triggered() => {}
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(alert = true, error = %e, "Outbox relay stopping on fatal error");
                    self.shutdown.trigger();
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Relay iteration failed");
                }
            }
        }
    }

    /// Receive at most one record and resolve it. `None` when nothing was available.
    pub async fn poll_once(
        &self,
        shutdown: &mut ShutdownListener,
    ) -> RelayResult<Option<Disposition>> {
        match self.source.receive(self.poll_timeout).await? {
            Next::Idle => Ok(None),
            Next::Handled(disposition) => Ok(Some(disposition)),
            Next::Message(message) => self.process(message, shutdown).await.map(Some),
        }
    }

    async fn process(
        &self,
        message: ConsumedMessage,
        shutdown: &mut ShutdownListener,
    ) -> RelayResult<Disposition> {
        let event_type = message.envelope().event_type_name().to_string();
        let subject = message.coordinates().to_string();

        let mapper = match self.registry.resolve(&event_type) {
            Ok(mapper) => mapper,
            Err(failure) => {
                self.metrics.unmapped_events.inc();
                error!(
                    alert = true,
                    coordinates = %subject,
                    event_type = %event_type,
                    "No mapper registered for event type, dead-lettering"
                );
                return message.fail(&failure).await;
            }
        };

        let outcome = {
            let envelope = message.envelope();
            let headers = message.headers();
            let publisher = self.publisher.as_ref();
            let mapper = mapper.as_ref();
            let retries = &self.metrics.publish_retries;

            with_retry_policy(&self.policy, &subject, shutdown, |ctx: &RetryContext| {
                if ctx.attempt > 1 {
                    retries.inc();
                }
                async move {
                    let wire = mapper.map(envelope)?;
                    publisher.publish(&wire, headers).await
                }
            })
            .await
        };

        match outcome {
            Ok(()) => {
                if shutdown.is_triggered() {
                    info!(coordinates = %subject, "Shutdown after publish, leaving offset uncommitted");
                    message.abandon();
                    return Ok(Disposition::Abandoned);
                }
                message.acknowledge().await?;
                self.metrics.published.inc();
                debug!(coordinates = %subject, event_type = %event_type, "Message relayed");
                Ok(Disposition::Committed)
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                info!(coordinates = %subject, attempts, "Shutdown during retries, abandoning message");
                message.abandon();
                Ok(Disposition::Abandoned)
            }
            Err(RetryError::Exhausted { attempts, error })
            | Err(RetryError::NotRetryable { attempts, error }) => {
                warn!(
                    coordinates = %subject,
                    event_type = %event_type,
                    attempts,
                    kind = %error.failure_kind(),
                    error = %error,
                    "Giving up on message"
                );
                message.fail(&error).await
            }
        }
    }
}
