use anyhow::{Context, Result};
use outbox_relay::{
    KafkaLogConsumer, KafkaPublisher, LoggingConsumer, LoggingPublisher, OutboxRelay, RelayConfig,
};
use outbox_relay_service::config::ServiceConfig;
use outbox_relay_service::{mappers, telemetry};
use resilience::Shutdown;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load relay configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    telemetry::init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => {
            info!("Outbox relay service stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(alert = true, "Outbox relay service failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> Result<()> {
    let service_config = ServiceConfig::from_env()?;

    info!(
        service = %config.service_name,
        group_id = %config.group_id,
        topics = ?config.topics(),
        "Starting outbox relay service"
    );

    let registry = mappers::registry(&service_config.orders_integration_topic)
        .context("Failed to register mappers")?;

    let shutdown = Shutdown::new();

    let consumer = KafkaLogConsumer::subscribe(&config, shutdown.clone())
        .context("Failed to create relay consumer")?;
    let publisher =
        KafkaPublisher::from_config(&config).context("Failed to create relay publisher")?;

    let relay = OutboxRelay::new(
        &config,
        Arc::new(LoggingConsumer::new(consumer)),
        Arc::new(LoggingPublisher::new(publisher)),
        registry,
        shutdown.clone(),
    )
    .context("Failed to build outbox relay")?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_shutdown.trigger();
    });

    relay.run().await.context("Outbox relay stopped")?;
    Ok(())
}
