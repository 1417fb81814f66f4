// NATS JetStream client for the dispatch queue

use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Work-queue stream holding dispatch messages
    pub stream_name: String,
    /// Subject dispatch messages are published on
    pub subject: String,
    /// Durable consumer shared by all listeners
    pub consumer_name: String,
    pub max_age_seconds: u64,
    /// Redelivery window for unacknowledged messages
    pub ack_wait_seconds: u64,
    /// Delivery attempts before JetStream gives up on a nacked message
    pub max_deliver: i64,
    pub publish_timeout_seconds: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "JOB_DISPATCH".to_string(),
            subject: "jobs.dispatch".to_string(),
            consumer_name: "job-listeners".to_string(),
            max_age_seconds: 86400, // 24 hours
            ack_wait_seconds: 300,
            max_deliver: 5,
            publish_timeout_seconds: 5,
        }
    }
}

/// NATS JetStream client
#[derive(Clone)]
pub struct NatsClient {
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server");

        Ok(Self {
            jetstream: async_nats::jetstream::new(client),
            config,
        })
    }

    /// Create the work-queue stream if it does not exist
    ///
    /// Work-queue retention removes a message once it is acknowledged.
    #[instrument(skip(self), fields(stream_name = %self.config.stream_name))]
    pub async fn ensure_stream(&self) -> Result<Stream, QueueError> {
        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.subject.clone()],
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(e.to_string()))?;

        info!("Dispatch stream ready");
        Ok(stream)
    }

    /// Durable pull consumer with explicit acknowledgement
    #[instrument(skip(self), fields(consumer_name = %self.config.consumer_name))]
    pub async fn pull_consumer(&self) -> Result<PullConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(e.to_string()))?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer_name.clone()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            max_deliver: self.config.max_deliver,
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config)
            .await
            .map_err(|e| QueueError::ConsumerCreation(e.to_string()))?;

        info!("Pull consumer ready");
        Ok(consumer)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Verify the stream is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::HealthCheck(e.to_string()))?;

        Ok(())
    }
}
