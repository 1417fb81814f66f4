// Worker binary entry point
//
// Runs `worker.listeners` competing listener loops on the NATS dispatch
// stream. Ctrl+C stops receiving and lets running jobs finish.

use anyhow::{Context, Result};
use common::capability::{CapabilityProvider, TracingLogSink};
use common::config::Settings;
use common::errors::ConfigurationError;
use common::jobs::HeartbeatJob;
use common::queue::{NatsClient, NatsMessageReceiver};
use common::registry::JobRegistry;
use common::telemetry;
use common::worker::{ListenerPool, QueueListener};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings.validate()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        nats_url = %settings.nats.url,
        listeners = settings.worker.listeners,
        ack_policy = ?settings.worker.ack_policy,
        "Starting job worker"
    );

    let registry = Arc::new(
        JobRegistry::builder()
            .register::<HeartbeatJob>()
            .build()
            .map_err(ConfigurationError::from)?,
    );

    // Mail, Persistence and Search clients are wired here once deployed
    let provider = CapabilityProvider::new().with_log(Arc::new(TracingLogSink));
    provider
        .validate(&registry)
        .map_err(ConfigurationError::from)?;
    let provider = Arc::new(provider);

    let nats_client = NatsClient::connect(settings.nats.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        e
    })?;
    nats_client.ensure_stream().await?;

    let mut listeners = Vec::with_capacity(settings.worker.listeners);
    for index in 0..settings.worker.listeners {
        let receiver = NatsMessageReceiver::connect(&nats_client).await?;
        listeners.push(
            QueueListener::new(
                format!("listener-{}", index),
                Arc::new(receiver),
                Arc::clone(&registry),
                Arc::clone(&provider),
            )
            .with_ack_policy(settings.worker.ack_policy)
            .with_receive_error_backoff(settings.worker.receive_error_backoff()),
        );
    }

    let pool = ListenerPool::new(listeners);
    pool.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    pool.shutdown_and_join().await;

    info!("Worker stopped");
    Ok(())
}
