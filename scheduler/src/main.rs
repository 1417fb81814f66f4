// Scheduler binary entry point
//
// Loads triggers, evaluates them on a fixed tick and publishes dispatch
// messages to NATS JetStream. Ctrl+C cancels pending occurrences and waits
// for in-flight dispatches.

use anyhow::{Context, Result};
use common::clock::SystemClock;
use common::config::Settings;
use common::errors::SchedulerError;
use common::queue::{NatsClient, NatsMessagePublisher};
use common::scheduler::{
    Dispatcher, JsonFileTriggerStore, Scheduler, SchedulerEngine, StaticTriggerStore,
    TriggerStore,
};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};

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
        tick_interval_ms = settings.scheduler.tick_interval_ms,
        "Starting job scheduler"
    );

    let nats_client = NatsClient::connect(settings.nats.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        e
    })?;
    nats_client.ensure_stream().await?;

    let publisher = Arc::new(NatsMessagePublisher::new(nats_client));
    let engine = Arc::new(SchedulerEngine::new(
        settings.scheduler.clone(),
        Arc::new(SystemClock),
        Dispatcher::new(publisher),
    ));

    let store: Box<dyn TriggerStore> = match &settings.scheduler.triggers_file {
        Some(path) => Box::new(JsonFileTriggerStore::new(path)),
        None => Box::new(StaticTriggerStore::new(settings.triggers.clone())),
    };
    let report = engine.load_from_store(store.as_ref()).await?;
    if report.scheduled.is_empty() {
        warn!("No triggers scheduled, the scheduler will stay idle");
    }

    let runner = Arc::clone(&engine);
    let scheduler_loop = tokio::spawn(async move { runner.start().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");

    engine.stop().await?;
    match scheduler_loop.await? {
        // Ctrl+C arrived before the loop started
        Ok(()) | Err(SchedulerError::ShutDown) => {}
        Err(e) => return Err(e.into()),
    }

    info!("Scheduler stopped");
    Ok(())
}
