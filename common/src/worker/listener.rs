// Queue listener: consumes dispatch messages and runs the named job
//
// Every per-message failure (malformed body, unknown identity, construction
// error, run error, panic) is contained here; the loop only ends on shutdown
// or when the queue closes.

use crate::capability::CapabilityProvider;
use crate::errors::ExecutionError;
use crate::queue::{Delivery, MessageReceiver};
use crate::registry::{JobDescriptor, JobRegistry};
use crate::telemetry;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn, Span};

/// When a resolvable message is acknowledged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Ack before the job runs. A worker crash mid-run loses the message.
    #[default]
    AfterResolve,
    /// Ack after a successful run, nak after a failed one. A crash mid-run
    /// leads to redelivery, so a job may run more than once.
    AfterCompletion,
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    Failed,
    Unresolved,
    Malformed,
}

/// One consumer loop bound to a receiver
pub struct QueueListener {
    id: String,
    receiver: Arc<dyn MessageReceiver>,
    registry: Arc<JobRegistry>,
    provider: Arc<CapabilityProvider>,
    ack_policy: AckPolicy,
    receive_error_backoff: Duration,
    shutdown_flag: AtomicBool,
    shutdown_notify: Notify,
}

impl QueueListener {
    pub fn new(
        id: impl Into<String>,
        receiver: Arc<dyn MessageReceiver>,
        registry: Arc<JobRegistry>,
        provider: Arc<CapabilityProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            receiver,
            registry,
            provider,
            ack_policy: AckPolicy::default(),
            receive_error_backoff: Duration::from_secs(1),
            shutdown_flag: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    pub fn with_receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = backoff;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop receiving. A job that is already running finishes first.
    pub fn shutdown(&self) {
        info!(listener_id = %self.id, "Requesting listener shutdown");
        self.shutdown_flag.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not waiting right now
        self.shutdown_notify.notify_one();
    }

    /// Run until shutdown or until the queue closes
    #[instrument(skip(self), fields(listener_id = %self.id))]
    pub async fn run(&self) {
        info!(ack_policy = ?self.ack_policy, "Listener started, waiting for messages");

        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = self.shutdown_notify.notified() => break,
                received = self.receiver.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    self.handle_delivery(delivery).await;
                }
                Ok(None) => {
                    info!("Queue closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error receiving message");
                    tokio::select! {
                        _ = self.shutdown_notify.notified() => break,
                        _ = tokio::time::sleep(self.receive_error_backoff) => {}
                    }
                }
            }
        }

        info!("Listener stopped");
    }

    /// Decode, resolve, wire and run one delivery, then settle it
    #[instrument(skip(self, delivery), fields(listener_id = %self.id, job_identity = tracing::field::Empty))]
    pub async fn handle_delivery(&self, delivery: Delivery) -> MessageOutcome {
        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding malformed dispatch message");
                telemetry::record_message_discarded("malformed");
                self.ack(&delivery).await;
                return MessageOutcome::Malformed;
            }
        };

        let identity = message.job_identity();
        Span::current().record("job_identity", identity);

        let Some(descriptor) = self.registry.resolve(identity) else {
            let unresolved = ExecutionError::UnresolvedJobIdentity(identity.to_string());
            warn!(
                job_identity = %identity,
                error = %unresolved,
                "Discarding message for unknown job identity"
            );
            telemetry::record_message_discarded("unresolved");
            self.ack(&delivery).await;
            return MessageOutcome::Unresolved;
        };

        if self.ack_policy == AckPolicy::AfterResolve {
            self.ack(&delivery).await;
        }

        let started = Instant::now();
        let result = self.execute(descriptor).await;
        telemetry::record_job_duration(identity, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                telemetry::record_job_success(identity);
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                if self.ack_policy == AckPolicy::AfterCompletion {
                    self.ack(&delivery).await;
                }
                MessageOutcome::Completed
            }
            Err(e) => {
                telemetry::record_job_failure(identity, failure_reason(&e));
                error!(job_identity = %identity, error = %e, "Job failed");
                if self.ack_policy == AckPolicy::AfterCompletion {
                    if let Err(e) = delivery.nak().await {
                        error!(error = %e, "Failed to negative acknowledge message");
                    }
                }
                MessageOutcome::Failed
            }
        }
    }

    /// Build a fresh instance with only its declared capabilities and run it
    async fn execute(&self, descriptor: &JobDescriptor) -> Result<(), ExecutionError> {
        let identity = descriptor.identity();
        let capabilities = self.provider.wire(descriptor.capabilities());
        debug!(capabilities = ?capabilities, "Capabilities wired");

        let constructed =
            std::panic::catch_unwind(AssertUnwindSafe(|| descriptor.instantiate(&capabilities)));
        let mut job = match constructed {
            Ok(Ok(job)) => job,
            Ok(Err(e)) => {
                return Err(ExecutionError::ConstructionFailed {
                    job_identity: identity.to_string(),
                    reason: format!("{:#}", e),
                })
            }
            Err(panic) => {
                return Err(ExecutionError::Panicked {
                    job_identity: identity.to_string(),
                    reason: panic_message(panic.as_ref()),
                })
            }
        };

        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ExecutionError::RunFailed {
                job_identity: identity.to_string(),
                reason: format!("{:#}", e),
            }),
            Err(panic) => Err(ExecutionError::Panicked {
                job_identity: identity.to_string(),
                reason: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }
    }
}

fn failure_reason(error: &ExecutionError) -> &'static str {
    match error {
        ExecutionError::UnresolvedJobIdentity(_) => "unresolved",
        ExecutionError::ConstructionFailed { .. } => "construction",
        ExecutionError::RunFailed { .. } => "error",
        ExecutionError::Panicked { .. } => "panic",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::registry::{Job, JobRegistryBuilder};
    use async_trait::async_trait;

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        async fn run(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn listener(queue: &InMemoryQueue, policy: AckPolicy) -> QueueListener {
        let registry = JobRegistryBuilder::new()
            .register_fn("FailingJob", &[], |_| Ok(Box::new(FailingJob) as Box<dyn Job>))
            .register_fn("BrokenJob", &[], |_| anyhow::bail!("missing setting"))
            .build()
            .unwrap();

        QueueListener::new(
            "test",
            Arc::new(queue.clone()),
            Arc::new(registry),
            Arc::new(CapabilityProvider::new()),
        )
        .with_ack_policy(policy)
    }

    async fn next(queue: &InMemoryQueue) -> Delivery {
        queue.receive().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_malformed_message_is_discarded() {
        let queue = InMemoryQueue::new();
        let listener = listener(&queue, AckPolicy::AfterCompletion);
        queue.push_raw(vec![0xff, 0xfe]);

        let outcome = listener.handle_delivery(next(&queue).await).await;
        assert_eq!(outcome, MessageOutcome::Malformed);
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_after_resolve_acks_failed_job() {
        let queue = InMemoryQueue::new();
        let listener = listener(&queue, AckPolicy::AfterResolve);
        queue.push_raw("FailingJob");

        let outcome = listener.handle_delivery(next(&queue).await).await;
        assert_eq!(outcome, MessageOutcome::Failed);
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.nacked(), 0);
    }

    #[tokio::test]
    async fn test_after_completion_naks_failed_job() {
        let queue = InMemoryQueue::new();
        let listener = listener(&queue, AckPolicy::AfterCompletion);
        queue.push_raw("FailingJob");

        let outcome = listener.handle_delivery(next(&queue).await).await;
        assert_eq!(outcome, MessageOutcome::Failed);
        assert_eq!(queue.acked(), 0);
        assert_eq!(queue.nacked(), 1);
    }

    #[tokio::test]
    async fn test_construction_failure_is_contained() {
        let queue = InMemoryQueue::new();
        let listener = listener(&queue, AckPolicy::AfterResolve);
        queue.push_raw("BrokenJob");

        let outcome = listener.handle_delivery(next(&queue).await).await;
        assert_eq!(outcome, MessageOutcome::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_immediately() {
        let queue = InMemoryQueue::new();
        let listener = listener(&queue, AckPolicy::AfterResolve);
        listener.shutdown();

        tokio::time::timeout(Duration::from_secs(1), listener.run())
            .await
            .unwrap();
    }

    #[test]
    fn test_ack_policy_deserializes_snake_case() {
        let policy: AckPolicy = serde_json::from_str("\"after_completion\"").unwrap();
        assert_eq!(policy, AckPolicy::AfterCompletion);
        assert_eq!(AckPolicy::default(), AckPolicy::AfterResolve);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
