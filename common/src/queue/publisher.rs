// Dispatch message publishing

use crate::errors::QueueError;
use crate::models::DispatchMessage;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Queue-publish collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Hand one message to the queue. Returns once the queue has accepted it.
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError>;
}

/// JetStream publisher; waits for the stream's publish ack
pub struct NatsMessagePublisher {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsMessagePublisher {
    pub fn new(client: NatsClient) -> Self {
        let publish_timeout = Duration::from_secs(client.config().publish_timeout_seconds);
        Self {
            client,
            publish_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

#[async_trait]
impl MessagePublisher for NatsMessagePublisher {
    #[instrument(skip(self, message), fields(job_identity = %message.job_identity()))]
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        let subject = self.client.config().subject.clone();
        let dispatch_id = Uuid::new_v4();

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", dispatch_id.to_string().as_str());

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(subject.clone(), headers, message.encode().into())
            .await
            .map_err(|e| QueueError::PublishFailed(e.to_string()))?;

        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(ack)) => {
                debug!(
                    subject = %subject,
                    dispatch_id = %dispatch_id,
                    stream_sequence = ack.sequence,
                    "Dispatch message accepted by stream"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}
