// In-process dispatch queue
//
// Competing consumers share one receiver; a nacked message goes back on the
// queue. Used by tests and by single-process runs without a broker.

use crate::errors::QueueError;
use crate::models::DispatchMessage;
use crate::queue::consumer::{Acknowledger, Delivery, MessageReceiver};
use crate::queue::publisher::MessagePublisher;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

struct Shared {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    history: std::sync::Mutex<Vec<String>>,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    unavailable: AtomicBool,
    closed: AtomicBool,
    close_notify: Notify,
}

/// Cloneable handle; all clones address the same queue
#[derive(Clone)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                sender,
                receiver: Mutex::new(receiver),
                history: std::sync::Mutex::new(Vec::new()),
                acked: AtomicUsize::new(0),
                nacked: AtomicUsize::new(0),
                unavailable: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    /// Put a raw body on the queue, bypassing the publisher
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        // The receiver lives as long as the sender, so this cannot fail
        let _ = self.shared.sender.send(body.into());
    }

    /// Make publishes fail as if the broker were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Wake every waiting receiver and make further receives return None
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.close_notify.notify_waiters();
    }

    /// Identities accepted by `publish`, in order
    pub fn published(&self) -> Vec<String> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn acked(&self) -> usize {
        self.shared.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> usize {
        self.shared.nacked.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryQueue {
    async fn publish(&self, message: &DispatchMessage) -> Result<(), QueueError> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("queue unavailable".to_string()));
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        self.shared
            .sender
            .send(message.encode())
            .map_err(|_| QueueError::Closed)?;
        self.shared
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.job_identity().to_string());
        Ok(())
    }
}

#[async_trait]
impl MessageReceiver for InMemoryQueue {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let closed = self.shared.close_notify.notified();
        tokio::pin!(closed);
        // Register before checking the flag so a concurrent close is not missed
        closed.as_mut().enable();

        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let payload = tokio::select! {
            payload = async { self.shared.receiver.lock().await.recv().await } => payload,
            _ = &mut closed => None,
        };

        Ok(payload.map(|payload| {
            Delivery::new(
                payload.clone(),
                Box::new(MemoryAcknowledger {
                    shared: self.shared.clone(),
                    payload,
                }),
            )
        }))
    }
}

struct MemoryAcknowledger {
    shared: Arc<Shared>,
    payload: Vec<u8>,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self) -> Result<(), QueueError> {
        self.shared.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nak(&self) -> Result<(), QueueError> {
        self.shared.nacked.fetch_add(1, Ordering::SeqCst);
        self.shared
            .sender
            .send(self.payload.clone())
            .map_err(|_| QueueError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(identity: &str) -> DispatchMessage {
        DispatchMessage::new(identity).unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_receive() {
        let queue = InMemoryQueue::new();
        queue.publish(&message("DigestJob")).await.unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(delivery.decode().unwrap().job_identity(), "DigestJob");
        delivery.ack().await.unwrap();

        assert_eq!(queue.published(), vec!["DigestJob".to_string()]);
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_nak_redelivers() {
        let queue = InMemoryQueue::new();
        queue.publish(&message("SyncJob")).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        first.nak().await.unwrap();
        let second = queue.receive().await.unwrap().unwrap();

        assert_eq!(second.payload(), b"SyncJob");
        assert_eq!(queue.nacked(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_queue_rejects_publish() {
        let queue = InMemoryQueue::new();
        queue.set_unavailable(true);

        let result = queue.publish(&message("SyncJob")).await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
        assert!(queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_receiver() {
        let queue = InMemoryQueue::new();
        let receiver = queue.clone();
        let waiting = tokio::spawn(async move { receiver.receive().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_competing_receivers_each_get_one() {
        let queue = InMemoryQueue::new();
        queue.publish(&message("A")).await.unwrap();
        queue.publish(&message("B")).await.unwrap();

        let first = queue.clone().receive().await.unwrap().unwrap();
        let second = queue.clone().receive().await.unwrap().unwrap();
        assert_ne!(first.payload(), second.payload());
    }
}
