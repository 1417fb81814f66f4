// Dispatch message receiving

use crate::errors::QueueError;
use crate::models::DispatchMessage;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::consumer::pull::Stream as PullStream;
use async_nats::jetstream::{AckKind, Message};
use async_trait::async_trait;
use futures::StreamExt;
use std::fmt;
use tokio::sync::Mutex;
use tracing::instrument;

/// Settles one delivery with the queue
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from the queue
    async fn ack(&self) -> Result<(), QueueError>;

    /// Ask the queue to redeliver the message
    async fn nak(&self) -> Result<(), QueueError>;
}

/// A received message awaiting settlement
pub struct Delivery {
    payload: Vec<u8>,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            acknowledger,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn decode(&self) -> Result<DispatchMessage, QueueError> {
        DispatchMessage::decode(&self.payload)
    }

    pub async fn ack(&self) -> Result<(), QueueError> {
        self.acknowledger.ack().await
    }

    pub async fn nak(&self) -> Result<(), QueueError> {
        self.acknowledger.nak().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Queue-receive collaborator
///
/// Several receivers bound to the same queue compete: each message goes to
/// exactly one of them.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Wait for the next message. `Ok(None)` means the queue is closed.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;
}

/// Receiver over a JetStream durable pull consumer
pub struct NatsMessageReceiver {
    messages: Mutex<PullStream>,
}

impl NatsMessageReceiver {
    /// Open a message stream on the shared durable consumer
    #[instrument(skip(client))]
    pub async fn connect(client: &NatsClient) -> Result<Self, QueueError> {
        let consumer = client.pull_consumer().await?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to open message stream: {}", e)))?;

        Ok(Self {
            messages: Mutex::new(messages),
        })
    }
}

#[async_trait]
impl MessageReceiver for NatsMessageReceiver {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let next = self.messages.lock().await.next().await;

        match next {
            Some(Ok(message)) => {
                let payload = message.payload.to_vec();
                Ok(Some(Delivery::new(
                    payload,
                    Box::new(NatsAcknowledger { message }),
                )))
            }
            Some(Err(e)) => Err(QueueError::ConsumeFailed(e.to_string())),
            None => Ok(None),
        }
    }
}

struct NatsAcknowledger {
    message: Message,
}

#[async_trait]
impl Acknowledger for NatsAcknowledger {
    async fn ack(&self) -> Result<(), QueueError> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::AckFailed(e.to_string()))
    }

    async fn nak(&self) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| QueueError::AckFailed(format!("Failed to negative acknowledge: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAcknowledger {
        acks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Acknowledger for CountingAcknowledger {
        async fn ack(&self) -> Result<(), QueueError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nak(&self) -> Result<(), QueueError> {
            Err(QueueError::AckFailed("nak not expected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_delivery_decodes_and_acks() {
        let acks = Arc::new(AtomicUsize::new(0));
        let delivery = Delivery::new(
            b"DigestJob".to_vec(),
            Box::new(CountingAcknowledger { acks: acks.clone() }),
        );

        assert_eq!(delivery.decode().unwrap().job_identity(), "DigestJob");
        delivery.ack().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(delivery.nak().await.is_err());
    }
}
